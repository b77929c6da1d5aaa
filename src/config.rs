use std::env;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_API_VERSION: &str = "/api/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_TOKEN_DB: &str = "sqlite://catalog-client.db?mode=rwc";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_version: String,
    pub timeout: Duration,
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub token_db_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            stale_time: DEFAULT_STALE_TIME,
            gc_time: DEFAULT_GC_TIME,
            token_db_url: DEFAULT_TOKEN_DB.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn new_from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let base_url = env::var("CATALOG_API_URL").unwrap_or(defaults.base_url);
        let api_version = env::var("CATALOG_API_VERSION").unwrap_or(defaults.api_version);
        let token_db_url = env::var("CATALOG_TOKEN_DB").unwrap_or(defaults.token_db_url);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
            timeout: secs_from_env("CATALOG_TIMEOUT_SECS", defaults.timeout)?,
            stale_time: secs_from_env("CATALOG_STALE_SECS", defaults.stale_time)?,
            gc_time: secs_from_env("CATALOG_GC_SECS", defaults.gc_time)?,
            token_db_url,
        })
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }
}

fn secs_from_env(key: &str, default: Duration) -> Result<Duration, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| AppError::Config(format!("{} must be a number of seconds, got {:?}", key, raw))),
        Err(_) => Ok(default),
    }
}
