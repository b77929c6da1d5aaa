use thiserror::Error;

use crate::models::ValidationErrors;

/// Coarse classification of a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    ServerError,
    Timeout,
    NetworkError,
    ClientError,
    InvalidResponse,
    Request,
    Cancelled,
}

/// Error returned by the HTTP adapter and everything layered on top of it.
///
/// The variant is decided once, at the adapter boundary. Services may only
/// attach a readable message through [`ApiError::or_message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{}", .message.as_deref().unwrap_or("Session expired. Please login again."))]
    Unauthorized { message: Option<String> },

    #[error("{}", .message.as_deref().unwrap_or("Server error. Please try again later."))]
    Server { status: u16, message: Option<String> },

    #[error("{}", .message.as_deref().unwrap_or("Request timeout. Please check your connection."))]
    Timeout { message: Option<String> },

    #[error("{}", .message.as_deref().unwrap_or("No response from server. Please check your connection."))]
    Network { message: Option<String> },

    #[error("{}", display_client(.status, .message))]
    Client { status: u16, message: Option<String> },

    #[error("{}", .message.as_deref().unwrap_or("Unexpected response from server."))]
    InvalidResponse { message: Option<String> },

    #[error("{}", .message.as_deref().unwrap_or("Request setup error. Please try again."))]
    Request { message: Option<String> },

    #[error("Request was cancelled")]
    Cancelled,
}

fn display_client(status: &u16, message: &Option<String>) -> String {
    match message {
        Some(msg) => msg.clone(),
        None => format!("Request failed with status {}", status),
    }
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthorized { .. } => ErrorKind::Unauthorized,
            ApiError::Server { .. } => ErrorKind::ServerError,
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Network { .. } => ErrorKind::NetworkError,
            ApiError::Client { .. } => ErrorKind::ClientError,
            ApiError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            ApiError::Request { .. } => ErrorKind::Request,
            ApiError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// HTTP status of the response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Server { status, .. } | ApiError::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Client { status: 404, .. })
    }

    /// Transient failures the query cache is allowed to retry once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }

    /// Server- or service-supplied message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { message }
            | ApiError::Server { message, .. }
            | ApiError::Timeout { message }
            | ApiError::Network { message }
            | ApiError::Client { message, .. }
            | ApiError::InvalidResponse { message }
            | ApiError::Request { message } => message.as_deref(),
            ApiError::Cancelled => None,
        }
    }

    /// Fills in `default` when no message is present. Never changes the kind.
    pub fn or_message(mut self, default: &str) -> Self {
        match &mut self {
            ApiError::Unauthorized { message }
            | ApiError::Server { message, .. }
            | ApiError::Timeout { message }
            | ApiError::Network { message }
            | ApiError::Client { message, .. }
            | ApiError::InvalidResponse { message }
            | ApiError::Request { message } => {
                if message.is_none() {
                    *message = Some(default.to_string());
                }
            }
            ApiError::Cancelled => {}
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            AppError::Api(err) => Some(err),
            _ => None,
        }
    }
}
