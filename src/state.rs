use std::sync::Arc;

use crate::cache::{CacheConfig, QueryCache};
use crate::catalog::Catalog;
use crate::config::ClientConfig;
use crate::db::{SqliteTokenStore, TokenStore};
use crate::error::AppError;
use crate::http::{HttpClient, Notifier};
use crate::services::{CourseService, InstanceService};

/// Everything a client session needs, built once and passed down.
#[derive(Clone)]
pub struct ClientContext {
    pub config: ClientConfig,
    pub http: HttpClient,
    pub catalog: Catalog,
}

impl ClientContext {
    pub fn init(
        config: ClientConfig,
        tokens: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppError> {
        let http = HttpClient::new(&config, tokens, notifier.clone())?;
        let cache = QueryCache::new(CacheConfig {
            stale_time: config.stale_time,
            gc_time: config.gc_time,
            ..CacheConfig::default()
        });
        let catalog = Catalog::new(
            CourseService::new(http.clone()),
            InstanceService::new(http.clone()),
            cache,
            notifier,
        );

        Ok(Self {
            config,
            http,
            catalog,
        })
    }

    /// Like [`ClientContext::init`], with the token kept in the SQLite
    /// database named by `config.token_db_url`.
    pub async fn init_persistent(config: ClientConfig, notifier: Arc<dyn Notifier>) -> Result<Self, AppError> {
        let tokens = SqliteTokenStore::connect(&config.token_db_url).await?;
        Self::init(config, Arc::new(tokens), notifier)
    }

    pub async fn login(&self, token: &str) -> Result<(), AppError> {
        self.http.tokens().set_token(token.trim()).await?;
        // Cached results were fetched under the previous identity.
        self.catalog.cache().clear();
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), AppError> {
        self.http.tokens().clear_token().await?;
        self.catalog.cache().clear();
        Ok(())
    }
}
