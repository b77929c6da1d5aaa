//! Query cache and mutation coordinator.
//!
//! Entries move through `Idle -> Pending -> (Success | Error)`. A successful
//! entry turns stale once its time-to-live elapses; a read of a stale entry
//! returns the stale value immediately and revalidates in the background.
//!
//! At most one fetch per key is in flight. Every fetch gets a flight id and
//! only the entry's current flight may write its result, so a response that
//! was superseded (by `refetch`, an invalidation or a cancel) is dropped.
//! The entry map is only touched while holding the coordinator's lock,
//! which is never held across an await point.
//!
//! A flight is aborted when the last observer of its key leaves, unless a
//! `fetch` or `refetch` caller is still waiting on it.

pub mod key;
pub mod observer;
pub mod state;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{DEFAULT_GC_TIME, DEFAULT_STALE_TIME};
use crate::error::ApiError;

pub use key::{KeyFilter, QueryKey, ResourceKind};
pub use observer::QueryObserver;
pub use state::{MutateOptions, ObserverOptions, QueryState, QueryStatus, ReadOptions};

type AnyValue = Arc<dyn Any + Send + Sync>;
type FlightResult = Result<AnyValue, ApiError>;
type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<FlightResult> + Send + Sync>;

const CHANGE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub stale_time: Duration,
    pub gc_time: Duration,
    /// Automatic retries after a retryable failure.
    pub retries: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time: DEFAULT_STALE_TIME,
            gc_time: DEFAULT_GC_TIME,
            retries: 1,
        }
    }
}

struct Flight {
    id: u64,
    rx: watch::Receiver<Option<FlightResult>>,
    handle: JoinHandle<()>,
    /// `fetch`/`refetch` calls currently awaiting this flight.
    waiters: usize,
}

struct Entry {
    status: QueryStatus,
    data: Option<AnyValue>,
    error: Option<ApiError>,
    fetched_at: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
    invalidated: bool,
    touched_at: Instant,
    flight: Option<Flight>,
}

impl Entry {
    fn new(now: Instant) -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
            updated_at: None,
            invalidated: false,
            touched_at: now,
            flight: None,
        }
    }

    fn is_stale(&self, ttl: Duration, now: Instant) -> bool {
        self.invalidated
            || self
                .fetched_at
                .is_none_or(|at| now.saturating_duration_since(at) >= ttl)
    }

    fn needs_fetch(&self, ttl: Duration, now: Instant) -> bool {
        if self.flight.is_some() {
            return false;
        }
        match self.status {
            QueryStatus::Idle | QueryStatus::Pending => true,
            QueryStatus::Success => self.is_stale(ttl, now),
            QueryStatus::Error => self.invalidated,
        }
    }

    fn has_fresh<T: Send + Sync + 'static>(&self, ttl: Duration, now: Instant) -> Option<Arc<T>> {
        if self.status != QueryStatus::Success || self.is_stale(ttl, now) {
            return None;
        }
        self.data.clone().and_then(|v| v.downcast::<T>().ok())
    }

    fn settled_status(&self) -> QueryStatus {
        if self.error.is_some() {
            QueryStatus::Error
        } else if self.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Idle
        }
    }

    /// Forget the current flight without aborting it; its result is dropped.
    fn detach_flight(&mut self) -> Option<Flight> {
        let flight = self.flight.take();
        if flight.is_some() {
            self.status = self.settled_status();
        }
        flight
    }

    fn snapshot<T: Send + Sync + 'static>(&self, key: &QueryKey, ttl: Duration, now: Instant) -> QueryState<T> {
        let data = self.data.clone().and_then(|v| v.downcast::<T>().ok());
        QueryState {
            status: self.status,
            key: data.as_ref().map(|_| key.clone()),
            data,
            error: self.error.clone(),
            is_fetching: self.flight.is_some(),
            is_stale: self.is_stale(ttl, now),
            is_previous_data: false,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<QueryKey, Entry>,
    observers: HashMap<QueryKey, usize>,
    next_flight: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    config: CacheConfig,
    changes: broadcast::Sender<QueryKey>,
    mutations: AtomicUsize,
}

/// Handle to the cache. Clones share the same entries.
#[derive(Clone)]
pub struct QueryCache {
    shared: Arc<Shared>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                config,
                changes,
                mutations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The map stays consistent between statements, so a poisoned lock is still usable.
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ttl(&self, options: &ReadOptions) -> Duration {
        options.ttl.unwrap_or(self.shared.config.stale_time)
    }

    fn changed(&self, key: &QueryKey) {
        let _ = self.shared.changes.send(key.clone());
    }

    /// Stream of keys whose entry changed.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.shared.changes.subscribe()
    }

    /// Returns the last known state for `key` right away and, when the entry
    /// is absent, stale or invalidated, starts a fetch in the background.
    ///
    /// A failed entry is returned as is; use [`QueryCache::refetch`] to retry.
    /// Must be called from within a tokio runtime.
    pub fn read<T, F, Fut>(&self, key: &QueryKey, fetcher: F, options: ReadOptions) -> QueryState<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let ttl = self.ttl(&options);
        let now = Instant::now();
        let mut inner = self.lock();

        let needs_fetch = {
            let entry = inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(now));
            entry.touched_at = now;
            entry.needs_fetch(ttl, now)
        };
        if needs_fetch {
            self.start_flight(&mut inner, key, erase(fetcher));
        }

        match inner.entries.get(key) {
            Some(entry) => entry.snapshot(key, ttl, now),
            None => QueryState::idle(),
        }
    }

    /// Current state of `key` without triggering any fetch.
    pub fn peek<T: Send + Sync + 'static>(&self, key: &QueryKey, options: ReadOptions) -> QueryState<T> {
        let ttl = self.ttl(&options);
        let inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) => entry.snapshot(key, ttl, Instant::now()),
            None => QueryState::idle(),
        }
    }

    /// Resolves to a fresh value for `key`: the cached one if still fresh,
    /// otherwise the result of the in-flight fetch (joined) or of a new one.
    /// Unlike `read`, a failed entry starts a new fetch cycle.
    pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F, options: ReadOptions) -> Result<Arc<T>, ApiError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let ttl = self.ttl(&options);
        let waiter = {
            let now = Instant::now();
            let mut inner = self.lock();
            let entry = inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(now));
            entry.touched_at = now;

            if entry.flight.is_some() {
                debug!(%key, "joining in-flight fetch");
            } else if let Some(value) = entry.has_fresh::<T>(ttl, now) {
                return Ok(value);
            } else {
                self.start_flight(&mut inner, key, erase(fetcher));
            }
            self.enlist(&mut inner, key)?
        };
        waiter.result().await
    }

    /// Starts a new fetch for `key` even if one is in flight. The newest
    /// fetch wins: an older response arriving later is discarded.
    pub async fn refetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<Arc<T>, ApiError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let waiter = {
            let now = Instant::now();
            let mut inner = self.lock();
            let entry = inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(now));
            entry.touched_at = now;
            if entry.detach_flight().is_some() {
                debug!(%key, "superseding in-flight fetch");
            }
            self.start_flight(&mut inner, key, erase(fetcher));
            self.enlist(&mut inner, key)?
        };
        waiter.result().await
    }

    /// Runs `mutation` once. On success every entry matched by
    /// `options.affected` is invalidated so its next read refetches; cached
    /// data is never edited in place.
    pub async fn mutate<R, F, Fut>(&self, mutation: F, options: MutateOptions) -> Result<R, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, ApiError>>,
    {
        let _pending = MutationGuard::enter(&self.shared.mutations);
        let result = mutation().await;
        match &result {
            Ok(_) => {
                for filter in &options.affected {
                    self.invalidate(filter);
                }
            }
            Err(e) => warn!("mutation failed: {}", e),
        }
        result
    }

    /// Number of mutations currently running.
    pub fn pending_mutations(&self) -> usize {
        self.shared.mutations.load(Ordering::SeqCst)
    }

    /// Marks matching entries stale. A fetch already in flight for one of
    /// them is superseded, since it may have been issued before the change.
    pub fn invalidate(&self, filter: &KeyFilter) -> usize {
        let touched: Vec<QueryKey> = {
            let mut inner = self.lock();
            inner
                .entries
                .iter_mut()
                .filter(|(key, _)| filter.matches(key))
                .map(|(key, entry)| {
                    entry.invalidated = true;
                    entry.detach_flight();
                    key.clone()
                })
                .collect()
        };

        for key in &touched {
            debug!(%key, "invalidated");
            self.changed(key);
        }
        touched.len()
    }

    /// Abandons the in-flight fetch for `key`. Its task is aborted, its
    /// result never reaches the cache, and waiters see `ApiError::Cancelled`.
    pub fn cancel(&self, key: &QueryKey) {
        let flight = {
            let mut inner = self.lock();
            inner.entries.get_mut(key).and_then(Entry::detach_flight)
        };
        if let Some(flight) = flight {
            self.abort(key, flight);
        }
    }

    fn abort(&self, key: &QueryKey, flight: Flight) {
        debug!(%key, flight = flight.id, "cancelling fetch");
        flight.handle.abort();
        self.changed(key);
    }

    pub(crate) fn retain(&self, key: &QueryKey) {
        let mut inner = self.lock();
        *inner.observers.entry(key.clone()).or_insert(0) += 1;
    }

    /// Drops one observer of `key`. The last one out cancels a pending
    /// fetch that no `fetch`/`refetch` caller is waiting on.
    pub(crate) fn release(&self, key: &QueryKey) {
        let abandoned = {
            let mut inner = self.lock();
            match inner.observers.get_mut(key) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    return;
                }
                Some(_) => {
                    inner.observers.remove(key);
                }
                None => return,
            }

            let Some(entry) = inner.entries.get_mut(key) else {
                return;
            };
            match entry.flight.as_ref().map(|f| f.waiters) {
                Some(0) => entry.detach_flight(),
                Some(waiters) => {
                    debug!(%key, waiters, "last observer left, fetch kept for its waiters");
                    return;
                }
                None => return,
            }
        };
        if let Some(flight) = abandoned {
            self.abort(key, flight);
        }
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.lock().observers.get(key).copied().unwrap_or(0)
    }

    /// Removes entries nobody observes, with nothing in flight, untouched
    /// for longer than the configured `gc_time`.
    pub fn collect_garbage(&self) -> usize {
        let gc_time = self.shared.config.gc_time;
        let now = Instant::now();
        let mut inner = self.lock();
        let Inner {
            entries, observers, ..
        } = &mut *inner;

        let before = entries.len();
        entries.retain(|key, entry| {
            observers.contains_key(key)
                || entry.flight.is_some()
                || now.saturating_duration_since(entry.touched_at) < gc_time
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        for entry in inner.entries.values_mut() {
            if let Some(flight) = entry.flight.take() {
                flight.handle.abort();
            }
        }
        inner.entries.clear();
    }

    /// Registers a waiter on the current flight of `key`.
    fn enlist(&self, inner: &mut Inner, key: &QueryKey) -> Result<Waiter, ApiError> {
        let flight = inner
            .entries
            .get_mut(key)
            .and_then(|e| e.flight.as_mut())
            .ok_or(ApiError::Cancelled)?;
        flight.waiters += 1;
        Ok(Waiter {
            cache: self.clone(),
            key: key.clone(),
            flight: flight.id,
            rx: flight.rx.clone(),
        })
    }

    fn start_flight(&self, inner: &mut Inner, key: &QueryKey, fetcher: ErasedFetcher) {
        let id = inner.next_flight;
        inner.next_flight += 1;

        let (tx, rx) = watch::channel(None);
        let cache = self.clone();
        let task_key = key.clone();
        let retries = self.shared.config.retries;

        let handle = tokio::spawn(async move {
            let result = run_with_retry(&task_key, &fetcher, retries).await;
            cache.complete(&task_key, id, result.clone());
            let _ = tx.send(Some(result));
        });

        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.status != QueryStatus::Success {
                entry.status = QueryStatus::Pending;
            }
            entry.invalidated = false;
            entry.flight = Some(Flight {
                id,
                rx,
                handle,
                waiters: 0,
            });
        }
        debug!(%key, flight = id, "fetch started");
        self.changed(key);
    }

    fn complete(&self, key: &QueryKey, id: u64, result: FlightResult) {
        {
            let mut inner = self.lock();
            let Some(entry) = inner.entries.get_mut(key) else {
                debug!(%key, flight = id, "entry gone, dropping response");
                return;
            };
            if entry.flight.as_ref().map(|f| f.id) != Some(id) {
                debug!(%key, flight = id, "dropping superseded response");
                return;
            }

            let now = Instant::now();
            entry.flight = None;
            entry.touched_at = now;
            match result {
                Ok(value) => {
                    entry.data = Some(value);
                    entry.error = None;
                    entry.status = QueryStatus::Success;
                    entry.fetched_at = Some(now);
                    entry.updated_at = Some(Utc::now());
                }
                Err(err) => {
                    debug!(%key, "fetch failed: {}", err);
                    entry.error = Some(err);
                    entry.status = QueryStatus::Error;
                }
            }
        }
        self.changed(key);
    }
}

/// A `fetch` or `refetch` call awaiting one flight. Counted on the flight
/// until the call returns or is dropped.
struct Waiter {
    cache: QueryCache,
    key: QueryKey,
    flight: u64,
    rx: watch::Receiver<Option<FlightResult>>,
}

impl Waiter {
    async fn result<T: Send + Sync + 'static>(self) -> Result<Arc<T>, ApiError> {
        await_flight(self.rx.clone()).await
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut inner = self.cache.lock();
        let flight = inner
            .entries
            .get_mut(&self.key)
            .and_then(|e| e.flight.as_mut())
            .filter(|f| f.id == self.flight);
        if let Some(flight) = flight {
            flight.waiters = flight.waiters.saturating_sub(1);
        }
    }
}

struct MutationGuard<'a>(&'a AtomicUsize);

impl<'a> MutationGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn erase<T, F, Fut>(fetcher: F) -> ErasedFetcher
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
    Arc::new(move || {
        let fut = fetcher();
        Box::pin(async move { fut.await.map(|value| Arc::new(value) as AnyValue) })
    })
}

async fn run_with_retry(key: &QueryKey, fetcher: &ErasedFetcher, retries: u8) -> FlightResult {
    let mut attempt: u8 = 0;
    loop {
        match fetcher().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(%key, attempt, "fetch failed, retrying: {}", err);
            }
            Err(err) => return Err(err),
        }
    }
}

async fn await_flight<T: Send + Sync + 'static>(
    mut rx: watch::Receiver<Option<FlightResult>>,
) -> Result<Arc<T>, ApiError> {
    let result = match rx.wait_for(Option::is_some).await {
        Ok(done) => done.clone().unwrap_or(Err(ApiError::Cancelled)),
        Err(_) => Err(ApiError::Cancelled),
    };
    result.and_then(|value| {
        value.downcast::<T>().map_err(|_| ApiError::InvalidResponse {
            message: Some("cached value has an unexpected type".to_string()),
        })
    })
}
