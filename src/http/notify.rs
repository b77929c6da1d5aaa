use tracing::{info, warn};

use crate::error::{ApiError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A transient, user-visible message (a "toast").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub kind: Option<ErrorKind>,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
            kind: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
            kind: None,
        }
    }

    /// The notice shown for a failed call.
    pub fn for_error(err: &ApiError) -> Self {
        let message = match err {
            ApiError::Unauthorized { .. } => "Session expired. Please login again.".to_string(),
            ApiError::Server { .. } => "Server error. Please try again later.".to_string(),
            ApiError::Timeout { .. } => "Request timeout. Please check your connection.".to_string(),
            ApiError::Network { .. } => "Network error. Please check your connection.".to_string(),
            ApiError::Client { .. } => err.to_string(),
            ApiError::InvalidResponse { .. } => "Unexpected response from server.".to_string(),
            ApiError::Request { .. } => "Request setup error. Please try again.".to_string(),
            ApiError::Cancelled => "Request was cancelled".to_string(),
        };
        Self {
            level: NoticeLevel::Error,
            message,
            kind: Some(err.kind()),
        }
    }
}

/// Side effects the HTTP adapter triggers on behalf of the UI layer.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);

    /// The session ended (401). The embedding UI navigates to its login boundary.
    fn session_expired(&self) {}
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notice: Notice) {}
}

/// Forwards notices to `tracing`.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => warn!(kind = ?notice.kind, "{}", notice.message),
            NoticeLevel::Info | NoticeLevel::Success => info!("{}", notice.message),
        }
    }

    fn session_expired(&self) {
        warn!("session expired, login required");
    }
}
