use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::QueryKey;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Nothing fetched and nothing in flight.
    Idle,
    /// First fetch (or retry after failure) in flight, no settled result yet.
    Pending,
    Success,
    Error,
}

/// What a view sees for one query at one moment.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<Arc<T>>,
    /// Key the `data` belongs to. Differs from the requested key only when
    /// `is_previous_data` is set.
    pub key: Option<QueryKey>,
    pub error: Option<ApiError>,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub is_previous_data: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> QueryState<T> {
    pub fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            key: None,
            error: None,
            is_fetching: false,
            is_stale: true,
            is_previous_data: false,
            updated_at: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.data.is_none() && matches!(self.status, QueryStatus::Pending | QueryStatus::Idle)
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Overrides the cache-wide time-to-live for this read.
    pub ttl: Option<Duration>,
}

impl ReadOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObserverOptions {
    pub read: ReadOptions,
    /// While a new key is pending, keep showing the previous key's last good
    /// value (flagged `is_previous_data`) instead of an empty state.
    pub keep_previous_on_key_change: bool,
}

impl ObserverOptions {
    pub fn keep_previous() -> Self {
        Self {
            read: ReadOptions::default(),
            keep_previous_on_key_change: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MutateOptions {
    pub affected: Vec<crate::cache::KeyFilter>,
}

impl MutateOptions {
    pub fn invalidate(filter: impl Into<crate::cache::KeyFilter>) -> Self {
        Self {
            affected: vec![filter.into()],
        }
    }

    pub fn and(mut self, filter: impl Into<crate::cache::KeyFilter>) -> Self {
        self.affected.push(filter.into());
        self
    }
}
