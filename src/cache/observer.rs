use std::future::Future;
use std::sync::Arc;

use crate::cache::{ObserverOptions, QueryCache, QueryKey, QueryState};
use crate::error::ApiError;

/// A mounted view's subscription to one query key at a time.
///
/// Switching to another key (or dropping the observer) releases the old
/// key; if nobody else observes it, its pending fetch is cancelled and its
/// result never shows up anywhere.
pub struct QueryObserver<T> {
    cache: QueryCache,
    options: ObserverOptions,
    key: Option<QueryKey>,
    last_good: Option<(QueryKey, Arc<T>)>,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
    pub fn new(cache: QueryCache, options: ObserverOptions) -> Self {
        Self {
            cache,
            options,
            key: None,
            last_good: None,
        }
    }

    pub fn key(&self) -> Option<&QueryKey> {
        self.key.as_ref()
    }

    /// Points the observer at `key` and reads it.
    pub fn observe<F, Fut>(&mut self, key: QueryKey, fetcher: F) -> QueryState<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        if self.key.as_ref() != Some(&key) {
            if let Some(old) = self.key.take() {
                self.cache.release(&old);
            }
            self.cache.retain(&key);
            self.key = Some(key.clone());
            if !self.options.keep_previous_on_key_change {
                self.last_good = None;
            }
        }

        let state = self.cache.read(&key, fetcher, self.options.read);
        self.present(state)
    }

    /// Re-reads the current key without starting a fetch.
    pub fn current(&mut self) -> QueryState<T> {
        match self.key.clone() {
            Some(key) => {
                let state = self.cache.peek(&key, self.options.read);
                self.present(state)
            }
            None => QueryState::idle(),
        }
    }

    /// Releases the current key, like an unmount.
    pub fn detach(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.release(&key);
        }
        self.last_good = None;
    }

    fn present(&mut self, mut state: QueryState<T>) -> QueryState<T> {
        match (&state.data, &state.key) {
            (Some(data), Some(key)) => {
                self.last_good = Some((key.clone(), data.clone()));
            }
            _ if self.options.keep_previous_on_key_change => {
                if let Some((prev_key, prev)) = &self.last_good {
                    state.data = Some(prev.clone());
                    state.key = Some(prev_key.clone());
                    state.is_previous_data = true;
                }
            }
            _ => {}
        }
        state
    }
}

impl<T> Drop for QueryObserver<T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.release(&key);
        }
    }
}
