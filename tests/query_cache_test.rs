use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use catalog_client::ApiError;
use catalog_client::cache::{
    CacheConfig, KeyFilter, MutateOptions, ObserverOptions, QueryCache, QueryKey, QueryObserver,
    QueryStatus, ReadOptions, ResourceKind,
};

type Fut<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send>>;

fn key(name: &str) -> QueryKey {
    QueryKey::new(ResourceKind::CourseInstance, [name])
}

fn cache_with(stale: Duration, gc: Duration) -> QueryCache {
    QueryCache::new(CacheConfig {
        stale_time: stale,
        gc_time: gc,
        retries: 1,
    })
}

/// Fetcher whose n-th call (0-based) waits and answers as `script(n)` says.
fn scripted<T, S>(calls: &Arc<AtomicUsize>, script: S) -> impl Fn() -> Fut<T> + Clone + Send + Sync + use<T, S>
where
    T: Send + 'static,
    S: Fn(usize) -> (Duration, Result<T, ApiError>) + Clone + Send + Sync + 'static,
{
    let calls = calls.clone();
    move || -> Fut<T> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = script(n);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            result
        })
    }
}

fn versioned(calls: &Arc<AtomicUsize>, delay: Duration) -> impl Fn() -> Fut<String> + Clone + Send + Sync + use<> {
    scripted(calls, move |n| (delay, Ok(format!("v{}", n + 1))))
}

fn server_error() -> ApiError {
    ApiError::Server {
        status: 500,
        message: None,
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetches_share_one_request() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(100));
    let k = key("dedup");

    let (a, b) = tokio::join!(
        cache.fetch(&k, fetcher.clone(), ReadOptions::default()),
        cache.fetch(&k, fetcher.clone(), ReadOptions::default()),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*a.unwrap(), "v1");
    assert_eq!(*b.unwrap(), "v1");
}

#[tokio::test(start_paused = true)]
async fn read_while_pending_joins_the_flight() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(100));
    let k = key("pending");

    let first = cache.read(&k, fetcher.clone(), ReadOptions::default());
    assert_eq!(first.status, QueryStatus::Pending);
    assert!(first.is_loading());
    assert!(first.is_fetching);

    let second = cache.read(&k, fetcher.clone(), ReadOptions::default());
    assert!(second.is_fetching);

    let value = cache.fetch(&k, fetcher, ReadOptions::default()).await.unwrap();
    assert_eq!(*value, "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_entry_is_served_without_refetch() {
    let cache = cache_with(Duration::from_secs(60), Duration::from_secs(600));
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(10));
    let k = key("fresh");

    cache.fetch(&k, fetcher.clone(), ReadOptions::default()).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;

    let state = cache.read(&k, fetcher.clone(), ReadOptions::default());
    assert!(state.is_success());
    assert!(!state.is_stale);
    assert!(!state.is_fetching);
    assert_eq!(state.data.as_deref().map(String::as_str), Some("v1"));
    assert_eq!(state.key.as_ref(), Some(&k));
    assert!(state.updated_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_is_returned_and_revalidated() {
    let cache = cache_with(Duration::from_secs(60), Duration::from_secs(600));
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(10));
    let k = key("swr");

    cache.fetch(&k, fetcher.clone(), ReadOptions::default()).await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;

    let state = cache.read(&k, fetcher.clone(), ReadOptions::default());
    assert_eq!(state.data.as_deref().map(String::as_str), Some("v1"));
    assert!(state.is_stale);
    assert!(state.is_fetching);
    assert_eq!(state.status, QueryStatus::Success);

    let refreshed = cache.fetch(&k, fetcher, ReadOptions::default()).await.unwrap();
    assert_eq!(*refreshed, "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn per_read_ttl_overrides_cache_default() {
    let cache = cache_with(Duration::from_secs(600), Duration::from_secs(600));
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(10));
    let k = key("ttl");

    cache.fetch(&k, fetcher.clone(), ReadOptions::default()).await.unwrap();
    tokio::time::advance(Duration::from_secs(5)).await;

    let state = cache.read(&k, fetcher, ReadOptions::with_ttl(Duration::from_secs(1)));
    assert!(state.is_stale);
    assert!(state.is_fetching);
}

#[tokio::test(start_paused = true)]
async fn successful_mutation_invalidates_affected_keys() {
    let cache = cache_with(Duration::from_secs(600), Duration::from_secs(600));
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(10));
    let list = key("list");
    let other = QueryKey::new(ResourceKind::Course, ["list"]);

    cache.fetch(&list, fetcher.clone(), ReadOptions::default()).await.unwrap();
    cache.fetch(&other, fetcher.clone(), ReadOptions::default()).await.unwrap();

    let during = cache.clone();
    let created = cache
        .mutate(
            move || async move {
                assert_eq!(during.pending_mutations(), 1);
                Ok::<_, ApiError>("created")
            },
            MutateOptions::invalidate(ResourceKind::CourseInstance),
        )
        .await
        .unwrap();
    assert_eq!(created, "created");
    assert_eq!(cache.pending_mutations(), 0);

    let stale = cache.peek::<String>(&list, ReadOptions::default());
    assert!(stale.is_stale);
    assert_eq!(stale.data.as_deref().map(String::as_str), Some("v1"));
    assert!(!cache.peek::<String>(&other, ReadOptions::default()).is_stale);

    let refreshed = cache.fetch(&list, fetcher, ReadOptions::default()).await.unwrap();
    assert_eq!(*refreshed, "v3");
}

#[tokio::test(start_paused = true)]
async fn failed_mutation_leaves_cache_untouched() {
    let cache = cache_with(Duration::from_secs(600), Duration::from_secs(600));
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(10));
    let k = key("list");

    cache.fetch(&k, fetcher.clone(), ReadOptions::default()).await.unwrap();

    let err = cache
        .mutate(
            || async { Err::<(), _>(server_error()) },
            MutateOptions::invalidate(KeyFilter::Exact(k.clone())),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));

    let state = cache.read(&k, fetcher, ReadOptions::default());
    assert!(!state.is_stale);
    assert!(!state.is_fetching);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn invalidation_supersedes_in_flight_fetch() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = scripted(&calls, |n| {
        if n == 0 {
            (Duration::from_millis(100), Ok("before".to_string()))
        } else {
            (Duration::from_millis(10), Ok("after".to_string()))
        }
    });
    let k = key("race");

    cache.read(&k, fetcher.clone(), ReadOptions::default());
    tokio::task::yield_now().await;
    assert_eq!(cache.invalidate(&KeyFilter::Exact(k.clone())), 1);

    let value = cache.fetch(&k, fetcher, ReadOptions::default()).await.unwrap();
    assert_eq!(*value, "after");

    // let the superseded response arrive
    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = cache.peek::<String>(&k, ReadOptions::default());
    assert_eq!(state.data.as_deref().map(String::as_str), Some("after"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn latest_refetch_wins_over_slower_earlier_one() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = scripted(&calls, |n| {
        if n == 0 {
            (Duration::from_millis(100), Ok("first".to_string()))
        } else {
            (Duration::from_millis(10), Ok("second".to_string()))
        }
    });
    let k = key("last-wins");

    cache.read(&k, fetcher.clone(), ReadOptions::default());
    tokio::task::yield_now().await;

    let latest = cache.refetch(&k, fetcher).await.unwrap();
    assert_eq!(*latest, "second");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = cache.peek::<String>(&k, ReadOptions::default());
    assert_eq!(state.data.as_deref().map(String::as_str), Some("second"));
    assert!(!state.is_fetching);
}

#[tokio::test(start_paused = true)]
async fn failure_is_stored_and_not_refetched_by_reads() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = scripted(&calls, |_| (Duration::from_millis(10), Err::<String, _>(server_error())));
    let k = key("broken");

    let err = cache
        .fetch(&k, fetcher.clone(), ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Server { status: 500, .. }));

    let state = cache.read(&k, fetcher.clone(), ReadOptions::default());
    assert!(state.is_error());
    assert!(!state.is_fetching);
    assert_eq!(state.error, Some(server_error()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // an explicit fetch starts a new cycle
    cache
        .fetch(&k, fetcher, ReadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn network_failure_is_retried_once() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = scripted(&calls, |n| {
        if n == 0 {
            (Duration::ZERO, Err(ApiError::Network { message: None }))
        } else {
            (Duration::ZERO, Ok(7u32))
        }
    });

    let value = cache
        .fetch(&key("flaky"), fetcher, ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(*value, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn persistent_network_failure_gives_up_after_one_retry() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = scripted(&calls, |_| (Duration::ZERO, Err::<u32, _>(ApiError::Network { message: None })));

    let err = cache
        .fetch(&key("down"), fetcher, ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Network { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_not_retried() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = scripted(&calls, |_| (Duration::ZERO, Err::<u32, _>(ApiError::Timeout { message: None })));

    let err = cache
        .fetch(&key("slow"), fetcher, ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Timeout { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_drops_result_and_fails_waiters() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(100));
    let k = key("cancel");

    cache.read(&k, fetcher.clone(), ReadOptions::default());
    let (result, _) = tokio::join!(
        cache.fetch(&k, fetcher.clone(), ReadOptions::default()),
        async {
            tokio::task::yield_now().await;
            cache.cancel(&k);
        },
    );
    assert_eq!(result.unwrap_err(), ApiError::Cancelled);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = cache.peek::<String>(&k, ReadOptions::default());
    assert!(state.data.is_none());
    assert!(!state.is_fetching);
    assert_eq!(state.status, QueryStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn changes_are_broadcast() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key("watched");
    let mut changes = cache.subscribe();

    cache
        .fetch(&k, versioned(&calls, Duration::ZERO), ReadOptions::default())
        .await
        .unwrap();

    assert_eq!(changes.recv().await.unwrap(), k);
    assert_eq!(changes.recv().await.unwrap(), k);
}

#[tokio::test(start_paused = true)]
async fn observer_without_keep_previous_shows_loading_on_key_change() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(10));
    let (one, two) = (key("period-1"), key("period-2"));

    let mut observer: QueryObserver<String> = QueryObserver::new(cache.clone(), ObserverOptions::default());
    observer.observe(one.clone(), fetcher.clone());
    cache.fetch(&one, fetcher.clone(), ReadOptions::default()).await.unwrap();
    assert_eq!(observer.current().data.as_deref().map(String::as_str), Some("v1"));

    let switched = observer.observe(two.clone(), fetcher.clone());
    assert!(switched.data.is_none());
    assert!(switched.is_loading());
    assert!(!switched.is_previous_data);
}

#[tokio::test(start_paused = true)]
async fn observer_with_keep_previous_labels_previous_data() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(10));
    let (one, two) = (key("period-1"), key("period-2"));

    let mut observer: QueryObserver<String> = QueryObserver::new(cache.clone(), ObserverOptions::keep_previous());
    observer.observe(one.clone(), fetcher.clone());
    cache.fetch(&one, fetcher.clone(), ReadOptions::default()).await.unwrap();
    observer.current();

    let switched = observer.observe(two.clone(), fetcher.clone());
    assert!(switched.is_previous_data);
    assert_eq!(switched.key.as_ref(), Some(&one));
    assert_eq!(switched.data.as_deref().map(String::as_str), Some("v1"));

    cache.fetch(&two, fetcher, ReadOptions::default()).await.unwrap();
    let settled = observer.current();
    assert!(!settled.is_previous_data);
    assert_eq!(settled.key.as_ref(), Some(&two));
    assert_eq!(settled.data.as_deref().map(String::as_str), Some("v2"));
}

#[tokio::test(start_paused = true)]
async fn rapid_key_switch_never_shows_abandoned_response() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let (sem1, sem2) = (key("2025-1"), key("2025-2"));
    let slow_sem1 = scripted(&calls, |_| (Duration::from_millis(100), Ok("semester 1 rows".to_string())));
    let fast_sem2 = scripted(&calls, |_| (Duration::from_millis(50), Ok("semester 2 rows".to_string())));

    let mut observer: QueryObserver<String> = QueryObserver::new(cache.clone(), ObserverOptions::default());
    observer.observe(sem1.clone(), slow_sem1);
    let switched = observer.observe(sem2.clone(), fast_sem2);
    assert!(switched.data.is_none());
    assert_eq!(cache.observer_count(&sem1), 0);
    assert_eq!(cache.observer_count(&sem2), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let shown = observer.current();
    assert_eq!(shown.key.as_ref(), Some(&sem2));
    assert_eq!(shown.data.as_deref().map(String::as_str), Some("semester 2 rows"));
    assert!(cache.peek::<String>(&sem1, ReadOptions::default()).data.is_none());
}

#[tokio::test(start_paused = true)]
async fn shared_key_keeps_fetching_until_last_observer_leaves() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(50));
    let k = key("shared");

    let mut a: QueryObserver<String> = QueryObserver::new(cache.clone(), ObserverOptions::default());
    let mut b: QueryObserver<String> = QueryObserver::new(cache.clone(), ObserverOptions::default());
    a.observe(k.clone(), fetcher.clone());
    b.observe(k.clone(), fetcher.clone());
    assert_eq!(cache.observer_count(&k), 2);

    drop(a);
    assert_eq!(cache.observer_count(&k), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(b.current().data.as_deref().map(String::as_str), Some("v1"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    b.detach();
    assert_eq!(cache.observer_count(&k), 0);
}

#[tokio::test(start_paused = true)]
async fn awaited_fetch_survives_last_observer_leaving() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(100));
    let k = key("awaited");

    let mut observer: QueryObserver<String> = QueryObserver::new(cache.clone(), ObserverOptions::default());
    observer.observe(k.clone(), fetcher.clone());
    let (result, _) = tokio::join!(
        cache.fetch(&k, fetcher.clone(), ReadOptions::default()),
        async {
            tokio::task::yield_now().await;
            observer.detach();
        },
    );

    assert_eq!(*result.unwrap(), "v1");
    assert_eq!(cache.observer_count(&k), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let state = cache.peek::<String>(&k, ReadOptions::default());
    assert_eq!(state.data.as_deref().map(String::as_str), Some("v1"));
}

#[tokio::test(start_paused = true)]
async fn abandoned_wait_no_longer_protects_the_flight() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::from_millis(100));
    let k = key("gave-up");

    let mut observer: QueryObserver<String> = QueryObserver::new(cache.clone(), ObserverOptions::default());
    observer.observe(k.clone(), fetcher.clone());
    let timed_out = tokio::time::timeout(
        Duration::from_millis(10),
        cache.fetch(&k, fetcher.clone(), ReadOptions::default()),
    )
    .await;
    assert!(timed_out.is_err());

    observer.detach();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let state = cache.peek::<String>(&k, ReadOptions::default());
    assert!(state.data.is_none());
    assert!(!state.is_fetching);
}

#[tokio::test(start_paused = true)]
async fn garbage_collection_spares_observed_entries() {
    let cache = cache_with(Duration::from_secs(1), Duration::from_secs(10));
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = versioned(&calls, Duration::ZERO);
    let (orphan, watched) = (key("orphan"), key("watched"));

    cache.fetch(&orphan, fetcher.clone(), ReadOptions::default()).await.unwrap();
    let mut observer: QueryObserver<String> = QueryObserver::new(cache.clone(), ObserverOptions::default());
    observer.observe(watched.clone(), fetcher.clone());
    cache.fetch(&watched, fetcher, ReadOptions::default()).await.unwrap();

    assert_eq!(cache.collect_garbage(), 0);
    tokio::time::advance(Duration::from_secs(11)).await;

    assert_eq!(cache.collect_garbage(), 1);
    assert_eq!(cache.len(), 1);
    assert!(cache.peek::<String>(&watched, ReadOptions::default()).data.is_some());
}

#[tokio::test(start_paused = true)]
async fn clear_empties_the_cache() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .fetch(&key("a"), versioned(&calls, Duration::ZERO), ReadOptions::default())
        .await
        .unwrap();
    assert!(!cache.is_empty());

    cache.clear();
    assert!(cache.is_empty());
}
