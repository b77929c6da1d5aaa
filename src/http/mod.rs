pub mod notify;

use std::fmt;
use std::sync::Arc;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::db::TokenStore;
use crate::error::{ApiError, AppError};

pub use notify::{LogNotifier, NoopNotifier, Notice, NoticeLevel, Notifier};

/// Per-call options for [`HttpClient::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    /// A 404 is an expected answer for this call: it is still returned as an
    /// error, but no notification fires.
    pub allow_not_found: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Request {
            message: Some(format!("Failed to encode request body: {}", e)),
        })?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn allow_not_found(mut self) -> Self {
        self.allow_not_found = true;
        self
    }
}

/// A request path: a fixed route plus id segments.
///
/// Segments are percent-encoded one by one when the URL is built, so an id
/// holding `/`, `?` or `#` stays inside its own segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPath {
    route: String,
    segments: Vec<String>,
}

impl ApiPath {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            segments: Vec::new(),
        }
    }

    pub fn segment(mut self, segment: impl ToString) -> Self {
        self.segments.push(segment.to_string());
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }
}

impl From<&str> for ApiPath {
    fn from(route: &str) -> Self {
        ApiPath::new(route)
    }
}

impl From<String> for ApiPath {
    fn from(route: String) -> Self {
        ApiPath::new(route)
    }
}

impl fmt::Display for ApiPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.route)?;
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Outbound adapter for the catalog API.
///
/// Every failed call is classified into an [`ApiError`] exactly once and
/// triggers exactly one notice on the injected [`Notifier`].
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    api_version: String,
    tokens: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
}

impl HttpClient {
    pub fn new(
        config: &ClientConfig,
        tokens: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            tokens,
            notifier,
        })
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub async fn get(&self, path: impl Into<ApiPath>, options: RequestOptions) -> Result<Value, ApiError> {
        self.request(Method::GET, path, options).await
    }

    pub async fn post(&self, path: impl Into<ApiPath>, options: RequestOptions) -> Result<Value, ApiError> {
        self.request(Method::POST, path, options).await
    }

    pub async fn put(&self, path: impl Into<ApiPath>, options: RequestOptions) -> Result<Value, ApiError> {
        self.request(Method::PUT, path, options).await
    }

    pub async fn delete(&self, path: impl Into<ApiPath>, options: RequestOptions) -> Result<Value, ApiError> {
        self.request(Method::DELETE, path, options).await
    }

    /// Issues one request and returns the parsed JSON body. An empty body is `null`.
    pub async fn request(
        &self,
        method: Method,
        path: impl Into<ApiPath>,
        options: RequestOptions,
    ) -> Result<Value, ApiError> {
        let path = path.into();
        let request_id = Uuid::new_v4();
        let result = self.send(request_id, method.clone(), &path, &options).await;

        if let Err(err) = &result {
            self.report(request_id, &method, &path, err, &options).await;
        }
        result
    }

    async fn send(
        &self,
        request_id: Uuid,
        method: Method,
        path: &ApiPath,
        options: &RequestOptions,
    ) -> Result<Value, ApiError> {
        let url = self.url_for(path, &options.params)?;

        let mut builder = self
            .client
            .request(method.clone(), url.clone())
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = self.current_token().await {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        debug!(%request_id, "[{}] {}", method, url);

        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;

        debug!(%request_id, "[{}] {} {}", status.as_u16(), method, url);

        if status.is_success() {
            parse_body(&text)
        } else {
            Err(classify_status(status, server_message(&text)))
        }
    }

    async fn current_token(&self) -> Option<String> {
        match self.tokens.get_token().await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!("token lookup failed, sending request unauthenticated: {}", e);
                None
            }
        }
    }

    async fn report(
        &self,
        request_id: Uuid,
        method: &Method,
        path: &ApiPath,
        err: &ApiError,
        options: &RequestOptions,
    ) {
        if err.is_not_found() && options.allow_not_found {
            debug!(%request_id, "[404] {} {} treated as empty", method, path);
            return;
        }
        if matches!(err, ApiError::Cancelled) {
            return;
        }

        error!(%request_id, status = ?err.status(), kind = ?err.kind(), "{} {} failed: {}", method, path, err);

        if matches!(err, ApiError::Unauthorized { .. }) {
            if let Err(e) = self.tokens.clear_token().await {
                warn!("failed to clear stored token: {}", e);
            }
            self.notifier.notify(Notice::for_error(err));
            self.notifier.session_expired();
        } else {
            self.notifier.notify(Notice::for_error(err));
        }
    }

    fn url_for(&self, path: &ApiPath, params: &[(String, String)]) -> Result<Url, ApiError> {
        let resolved = resolve_path(path.route(), &self.api_version);
        let full = if resolved.starts_with("http") {
            resolved
        } else {
            format!("{}{}", self.base_url, resolved)
        };

        let mut url = Url::parse(&full).map_err(|e| ApiError::Request {
            message: Some(format!("Invalid request url {}: {}", full, e)),
        })?;
        if !path.segments.is_empty() {
            let mut segments = url.path_segments_mut().map_err(|_| ApiError::Request {
                message: Some(format!("Cannot append path segments to {}", full)),
            })?;
            segments.pop_if_empty().extend(&path.segments);
        }
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

/// Prefixes `api_version` unless the path is absolute or already starts
/// with the version segment.
pub fn resolve_path(path: &str, api_version: &str) -> String {
    if path.starts_with("http") || api_version.is_empty() || is_versioned(path, api_version) {
        return path.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", api_version, path)
    } else {
        format!("{}/{}", api_version, path)
    }
}

fn is_versioned(path: &str, api_version: &str) -> bool {
    let version = api_version.trim_matches('/');
    path.trim_start_matches('/')
        .strip_prefix(version)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn parse_body(text: &str) -> Result<Value, ApiError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| ApiError::InvalidResponse {
        message: Some(format!("Failed to parse response: {}", e)),
    })
}

fn server_message(text: &str) -> Option<String> {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
        .filter(|m| !m.is_empty())
}

fn classify_status(status: StatusCode, message: Option<String>) -> ApiError {
    match status.as_u16() {
        401 => ApiError::Unauthorized { message },
        code if code >= 500 => ApiError::Server { status: code, message },
        code => ApiError::Client { status: code, message },
    }
}

fn classify_transport(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout { message: None }
    } else if err.is_builder() {
        ApiError::Request {
            message: Some(err.to_string()),
        }
    } else if err.is_decode() {
        ApiError::InvalidResponse {
            message: Some(err.to_string()),
        }
    } else {
        debug!("no response received: {}", err);
        ApiError::Network { message: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_version_segment() {
        assert_eq!(resolve_path("/getAll/course", "/api/v1"), "/api/v1/getAll/course");
        assert_eq!(resolve_path("course", "/api/v1"), "/api/v1/course");
    }

    #[test]
    fn leaves_absolute_and_versioned_paths() {
        assert_eq!(
            resolve_path("http://other.host/x", "/api/v1"),
            "http://other.host/x"
        );
        assert_eq!(resolve_path("/api/v1/course", "/api/v1"), "/api/v1/course");
        assert_eq!(resolve_path("api/v1/course", "/api/v1"), "api/v1/course");
    }

    #[test]
    fn version_must_match_a_whole_leading_segment() {
        assert_eq!(
            resolve_path("/api/v1beta/course", "/api/v1"),
            "/api/v1/api/v1beta/course"
        );
        assert_eq!(
            resolve_path("/getById/course/api/v1", "/api/v1"),
            "/api/v1/getById/course/api/v1"
        );
    }

    fn client() -> HttpClient {
        HttpClient::new(
            &ClientConfig::new("http://localhost:8080/"),
            Arc::new(crate::db::MemoryTokenStore::new()),
            Arc::new(NoopNotifier),
        )
        .unwrap()
    }

    #[test]
    fn id_segments_are_percent_encoded() {
        let path = ApiPath::new("/delete/course").segment("CS101#typo");
        let url = client().url_for(&path, &[]).unwrap();
        assert_eq!(url.path(), "/api/v1/delete/course/CS101%23typo");
        assert_eq!(url.fragment(), None);

        let path = ApiPath::new("/getById/course").segment("A/B?x=1");
        let url = client().url_for(&path, &[]).unwrap();
        assert_eq!(url.path(), "/api/v1/getById/course/A%2FB%3Fx=1");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn classifies_statuses() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None),
            ApiError::Unauthorized { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None),
            ApiError::Server { status: 502, .. }
        ));
        let err = classify_status(StatusCode::CONFLICT, Some("exists".to_string()));
        assert_eq!(err.to_string(), "exists");
    }

    #[test]
    fn extracts_server_message() {
        assert_eq!(
            server_message(r#"{"message":"Course already exists"}"#).as_deref(),
            Some("Course already exists")
        );
        assert_eq!(server_message("<html>oops</html>"), None);
    }
}
