//! Stale-while-revalidate cache engine.
//!
//! Entries live for the whole process; nothing is ever evicted. Freshness
//! policy alone decides whether a lookup is served from memory, served stale
//! while a background refresh runs, or blocks on a synchronous fetch.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, RwLock};

use metrics::counter;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::lock::rw_write;
use super::policy::{Freshness, SwrPolicy};

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT_TOTAL: &str = "sportello_cache_hit_total";
const METRIC_CACHE_STALE_SERVED_TOTAL: &str = "sportello_cache_stale_served_total";
const METRIC_CACHE_MISS_TOTAL: &str = "sportello_cache_miss_total";
const METRIC_CACHE_EXPIRED_TOTAL: &str = "sportello_cache_expired_total";
const METRIC_CACHE_REFRESH_FAILURE_TOTAL: &str = "sportello_cache_refresh_failure_total";

struct CacheEntry {
    value: Value,
    stored_at: Instant,
    refresh_in_flight: bool,
}

/// Read-through SWR cache keyed by derived route keys.
///
/// Cheap to clone; all clones share one entry map. Payloads are opaque JSON
/// documents passed through from the upstream unmodified.
#[derive(Clone, Default)]
pub struct SwrCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

enum Lookup {
    Hit(Value),
    ServeStale { value: Value, refresh: bool },
    Miss,
    ExpiredRefetch,
}

impl SwrCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key` under `policy`, falling back to `fetcher`.
    ///
    /// Fresh entries return without any upstream activity. Stale entries
    /// return the previous value immediately and, unless one is already in
    /// flight for this key, spawn a detached background refresh. Misses and
    /// expired entries block the caller on a synchronous fetch; its failure
    /// propagates and leaves any previous entry untouched.
    pub async fn get<F, Fut, E>(&self, key: &str, policy: SwrPolicy, fetcher: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        match self.classify_and_mark(key, policy) {
            Lookup::Hit(value) => {
                counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                debug!(target_module = SOURCE, key, outcome = "fresh", "cache hit");
                Ok(value)
            }
            Lookup::ServeStale { value, refresh } => {
                counter!(METRIC_CACHE_STALE_SERVED_TOTAL).increment(1);
                debug!(
                    target_module = SOURCE,
                    key,
                    outcome = "stale",
                    refresh_started = refresh,
                    "serving stale value"
                );
                if refresh {
                    self.spawn_refresh(key.to_owned(), fetcher());
                }
                Ok(value)
            }
            Lookup::Miss => {
                counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
                debug!(target_module = SOURCE, key, outcome = "miss", "cache miss");
                let value = fetcher().await?;
                self.store(key, value.clone());
                Ok(value)
            }
            Lookup::ExpiredRefetch => {
                counter!(METRIC_CACHE_EXPIRED_TOTAL).increment(1);
                debug!(
                    target_module = SOURCE,
                    key,
                    outcome = "expired",
                    "entry past stale ceiling, refetching"
                );
                // On failure the expired entry is retained as-is
                // (serve-stale-on-error, see DESIGN.md).
                let value = fetcher().await?;
                self.store(key, value.clone());
                Ok(value)
            }
        }
    }

    fn classify_and_mark(&self, key: &str, policy: SwrPolicy) -> Lookup {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        match entries.get_mut(key) {
            None => Lookup::Miss,
            Some(entry) => {
                let age = now.saturating_duration_since(entry.stored_at);
                match policy.classify(age) {
                    Freshness::Fresh => Lookup::Hit(entry.value.clone()),
                    Freshness::Stale => {
                        let refresh = !entry.refresh_in_flight;
                        if refresh {
                            entry.refresh_in_flight = true;
                        }
                        Lookup::ServeStale {
                            value: entry.value.clone(),
                            refresh,
                        }
                    }
                    Freshness::Expired => Lookup::ExpiredRefetch,
                }
            }
        }
    }

    /// Write a successfully fetched value. The timestamp is taken after the
    /// fetch resolved, so a slow upstream does not eat into the freshness
    /// window. An existing entry keeps its in-flight flag.
    fn store(&self, key: &str, value: Value) {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "store");
        match entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.stored_at = now;
            }
            None => {
                entries.insert(
                    key.to_owned(),
                    CacheEntry {
                        value,
                        stored_at: now,
                        refresh_in_flight: false,
                    },
                );
            }
        }
    }

    fn spawn_refresh<Fut, E>(&self, key: String, fut: Fut)
    where
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            // Dropped on every exit path, including a panicking fetcher, so
            // one failed refresh can never wedge the key.
            let release = InFlightRelease {
                cache: cache.clone(),
                key,
            };
            match fut.await {
                Ok(value) => {
                    cache.store(&release.key, value);
                    debug!(
                        target_module = SOURCE,
                        key = %release.key,
                        "background refresh stored fresh value"
                    );
                }
                Err(err) => {
                    counter!(METRIC_CACHE_REFRESH_FAILURE_TOTAL).increment(1);
                    warn!(
                        target_module = SOURCE,
                        key = %release.key,
                        error = %err,
                        "background refresh failed, keeping previous value"
                    );
                }
            }
        });
    }

    #[cfg(test)]
    fn refresh_in_flight(&self, key: &str) -> bool {
        rw_write(&self.entries, SOURCE, "test.refresh_in_flight")
            .get(key)
            .is_some_and(|entry| entry.refresh_in_flight)
    }
}

struct InFlightRelease {
    cache: SwrCache,
    key: String,
}

impl Drop for InFlightRelease {
    fn drop(&mut self) {
        let mut entries = rw_write(&self.cache.entries, SOURCE, "refresh.release");
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.refresh_in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::join_all;
    use serde_json::json;
    use tokio::sync::Notify;
    use tokio::time::advance;

    use super::*;
    use crate::cache::policy::StaleMaxAge;

    fn unbounded(max_age_secs: u64) -> SwrPolicy {
        SwrPolicy::new(Duration::from_secs(max_age_secs), StaleMaxAge::Unbounded)
    }

    fn bounded(max_age_secs: u64, grace_secs: u64) -> SwrPolicy {
        SwrPolicy::new(
            Duration::from_secs(max_age_secs),
            StaleMaxAge::Bounded(Duration::from_secs(grace_secs)),
        )
    }

    type BoxedFetch = std::pin::Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;
    type Fetcher = Box<dyn FnOnce() -> BoxedFetch>;

    fn counting_fetcher(calls: &Arc<AtomicUsize>, value: Value) -> Fetcher {
        let calls = calls.clone();
        Box::new(move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            })
        })
    }

    fn failing_fetcher(calls: &Arc<AtomicUsize>) -> Fetcher {
        let calls = calls.clone();
        Box::new(move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("upstream unavailable".to_string())
            })
        })
    }

    /// Let detached refresh tasks run to completion under the paused clock.
    async fn drain_background() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn miss_fetches_once_and_creates_entry() {
        let cache = SwrCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let value = cache
            .get("services", unbounded(60), counting_fetcher(&calls, json!({"a": 1})))
            .await
            .unwrap();

        assert_eq!(value, json!({"a": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Immediately fresh, no further upstream activity.
        let value = cache
            .get("services", unbounded(60), counting_fetcher(&calls, json!({"a": 2})))
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn miss_failure_propagates_and_creates_no_entry() {
        let cache = SwrCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let err = cache
            .get("services", unbounded(60), failing_fetcher(&calls))
            .await
            .unwrap_err();
        assert_eq!(err, "upstream unavailable");

        // Still a miss, not a hit on some phantom entry.
        let value = cache
            .get("services", unbounded(60), counting_fetcher(&calls, json!({"a": 1})))
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exact_max_age_boundary_is_fresh() {
        let cache = SwrCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get("services", unbounded(60), counting_fetcher(&calls, json!({"a": 1})))
            .await
            .unwrap();

        advance(Duration::from_secs(60)).await;

        let value = cache
            .get("services", unbounded(60), counting_fetcher(&calls, json!({"a": 2})))
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_serves_old_value_then_background_refresh_lands() {
        let cache = SwrCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get("services", unbounded(60), counting_fetcher(&calls, json!({"a": 1})))
            .await
            .unwrap();

        advance(Duration::from_secs(30)).await;
        let value = cache
            .get("services", unbounded(60), counting_fetcher(&calls, json!({"a": 2})))
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(60)).await;
        let value = cache
            .get("services", unbounded(60), counting_fetcher(&calls, json!({"a": 2})))
            .await
            .unwrap();
        // Stale path answers from the cache before the refresh completes.
        assert_eq!(value, json!({"a": 1}));

        drain_background().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.refresh_in_flight("services"));

        advance(Duration::from_secs(1)).await;
        let value = cache
            .get("services", unbounded(60), counting_fetcher(&calls, json!({"a": 3})))
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 2}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_stale_reads_trigger_one_refresh() {
        let cache = SwrCache::new();
        let seed_calls = Arc::new(AtomicUsize::new(0));

        cache
            .get("services", unbounded(60), counting_fetcher(&seed_calls, json!({"a": 1})))
            .await
            .unwrap();

        advance(Duration::from_secs(70)).await;

        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let reads = (0..5).map(|_| {
            let cache = cache.clone();
            let refresh_calls = refresh_calls.clone();
            let gate = gate.clone();
            async move {
                cache
                    .get("services", unbounded(60), move || async move {
                        refresh_calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok::<_, String>(json!({"a": 2}))
                    })
                    .await
            }
        });

        let values = join_all(reads).await;
        for value in values {
            assert_eq!(value.unwrap(), json!({"a": 1}));
        }

        drain_background().await;
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);

        gate.notify_waiters();
        drain_background().await;
        assert!(!cache.refresh_in_flight("services"));

        let value = cache
            .get("services", unbounded(60), counting_fetcher(&seed_calls, json!({"a": 9})))
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 2}));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_value_and_releases_the_flag() {
        let cache = SwrCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get("services", unbounded(60), counting_fetcher(&calls, json!({"a": 1})))
            .await
            .unwrap();

        advance(Duration::from_secs(90)).await;

        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let value = cache
            .get("services", unbounded(60), failing_fetcher(&refresh_calls))
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 1}));

        drain_background().await;
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
        assert!(!cache.refresh_in_flight("services"));

        // A later stale read starts exactly one new attempt, proving the
        // failed one did not leave the flag stuck.
        let value = cache
            .get("services", unbounded(60), failing_fetcher(&refresh_calls))
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
        drain_background().await;
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_blocks_on_synchronous_refetch() {
        let cache = SwrCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get("services_5", bounded(1, 0), counting_fetcher(&calls, json!({"list": []})))
            .await
            .unwrap();

        advance(Duration::from_secs(2)).await;

        let value = cache
            .get(
                "services_5",
                bounded(1, 0),
                counting_fetcher(&calls, json!({"list": [1]})),
            )
            .await
            .unwrap();
        assert_eq!(value, json!({"list": [1]}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_refetch_failure_retains_previous_entry() {
        let cache = SwrCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get("services_5", bounded(1, 0), counting_fetcher(&calls, json!({"list": []})))
            .await
            .unwrap();

        advance(Duration::from_secs(2)).await;

        let err = cache
            .get("services_5", bounded(1, 0), failing_fetcher(&calls))
            .await
            .unwrap_err();
        assert_eq!(err, "upstream unavailable");

        // The old value is still there: an unbounded policy for the same key
        // serves it stale instead of reporting a miss.
        let value = cache
            .get("services_5", unbounded(1), counting_fetcher(&calls, json!({"list": [2]})))
            .await
            .unwrap();
        assert_eq!(value, json!({"list": []}));
    }
}
