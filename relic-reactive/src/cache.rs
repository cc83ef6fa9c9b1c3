//! Time-bounded object cache with fetch coalescing.
//!
//! One [`ObjectCache`] fronts one backend model. Reads are served from cache
//! while entries are younger than the configured max age; anything else is
//! fetched under a per-id (or whole-set) fetch lock so that overlapping
//! concurrent reads collapse into a single outstanding backend call.
//!
//! # The retry-on-contention rule
//!
//! A reader that observes any lock covering its requested ids waits for
//! every such lock to release and then restarts its hit/miss classification
//! from scratch. It must not continue with the classification it computed
//! before waiting: the fetch it waited on has usually just written the very
//! ids it classified as missing. Each pass re-reads the lock table, so the
//! loop converges as soon as no lock remains.
//!
//! # Locks
//!
//! A lock is a watch channel. The fetching caller holds the [`FetchGuard`]
//! (and with it the sender half); waiters clone the receiver out of the
//! lock table and await channel closure. Dropping the guard removes the
//! table entries and closes the channel, waking every waiter. Release rides
//! on `Drop`, so it also happens when the backend call fails.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use relic_core::{CacheError, ObjectId, RelicResult, Storable, Timestamp};
use relic_storage::StorageBackend;
use tokio::sync::watch;

/// Default max cache age: five minutes.
pub const DEFAULT_MAX_AGE_SECONDS: i64 = 300;

/// Max age disabling expiry entirely: entries never go stale once fetched,
/// only explicit deletes remove them.
pub const NEVER_EXPIRE: i64 = -1;

// ============================================================================
// STORE DIRECTORY
// ============================================================================

static GLOBAL_DIRECTORY: Lazy<StoreDirectory> = Lazy::new(StoreDirectory::new);

/// Name-keyed directory of caches.
///
/// Two caches fronting the same backend under one name would each believe
/// they hold the authoritative warm copy, so constructing a second cache
/// with a taken name fails fast. Names are claimed on construction and
/// never released for the life of the directory.
///
/// The process-wide directory is the default; tests inject their own so
/// they can run isolated instances.
#[derive(Debug, Default)]
pub struct StoreDirectory {
    names: Mutex<HashSet<String>>,
}

impl StoreDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide directory.
    pub fn global() -> &'static StoreDirectory {
        &GLOBAL_DIRECTORY
    }

    fn claim(&self, name: &str) -> RelicResult<()> {
        let mut names = self.names.lock().unwrap();
        if !names.insert(name.to_string()) {
            return Err(CacheError::DuplicateStore {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for an [`ObjectCache`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Unique store name, claimed in the store directory.
    pub name: String,
    /// Max age in seconds before a cached entry is eligible for re-fetch.
    /// Negative disables expiry entirely.
    pub max_age_seconds: i64,
}

impl StoreConfig {
    /// Create a config with the default max age.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_age_seconds: DEFAULT_MAX_AGE_SECONDS,
        }
    }

    /// Set the max age in seconds; negative disables expiry.
    pub fn with_max_age_seconds(mut self, max_age_seconds: i64) -> Self {
        self.max_age_seconds = max_age_seconds;
        self
    }
}

// ============================================================================
// FETCHER CONTRACT
// ============================================================================

/// Read half of the backend contract, as consumed by the cache.
///
/// Every [`StorageBackend`] is a fetcher; test stubs implement this directly
/// to count and gate backend calls.
#[async_trait]
pub trait CacheFetcher<T>: Send + Sync {
    /// Fetch the requested objects. Missing ids are simply absent.
    async fn fetch_by_ids(&self, ids: &[ObjectId]) -> RelicResult<IndexMap<ObjectId, T>>;

    /// Fetch every stored object.
    async fn fetch_all(&self) -> RelicResult<IndexMap<ObjectId, T>>;
}

#[async_trait]
impl<T, B> CacheFetcher<T> for B
where
    T: Storable,
    B: StorageBackend<T>,
{
    async fn fetch_by_ids(&self, ids: &[ObjectId]) -> RelicResult<IndexMap<ObjectId, T>> {
        StorageBackend::fetch_by_ids(self, ids).await
    }

    async fn fetch_all(&self) -> RelicResult<IndexMap<ObjectId, T>> {
        StorageBackend::fetch_all(self).await
    }
}

// ============================================================================
// FETCH LOCKS
// ============================================================================

/// Receiver half of a fetch lock; closure of the channel is the release.
type LockSignal = watch::Receiver<()>;

#[derive(Debug, Default)]
struct LockTable {
    by_id: HashMap<ObjectId, LockSignal>,
    whole_set: Option<LockSignal>,
}

/// Held by the caller that won the race to fetch. Dropping it releases the
/// lock and wakes every waiter, whether the fetch succeeded or failed.
struct FetchGuard {
    table: Arc<Mutex<LockTable>>,
    ids: Vec<ObjectId>,
    whole_set: bool,
    _release: watch::Sender<()>,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap();
        if self.whole_set {
            table.whole_set = None;
        } else {
            for id in &self.ids {
                table.by_id.remove(id);
            }
        }
    }
}

async fn wait_for_release(mut blockers: Vec<LockSignal>) {
    for signal in blockers.iter_mut() {
        // Err means the sender dropped, i.e. the lock released. A lock
        // released before we get here resolves immediately.
        let _ = signal.changed().await;
    }
}

// ============================================================================
// CACHE
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    fetched_at: Timestamp,
}

#[derive(Debug)]
struct CacheState<T> {
    /// Insertion-ordered: re-inserting an entry moves it to the newest
    /// position, so iteration order is least- to most-recently written.
    entries: IndexMap<ObjectId, CacheEntry<T>>,
    last_fetch_all: Option<Timestamp>,
}

/// Time-bounded cache of current objects for one named store.
pub struct ObjectCache<T> {
    name: String,
    max_age_seconds: i64,
    state: Mutex<CacheState<T>>,
    locks: Arc<Mutex<LockTable>>,
    fetcher: Arc<dyn CacheFetcher<T>>,
}

impl<T: Clone + Send + Sync + 'static> ObjectCache<T> {
    /// Create a cache registered in the process-wide store directory.
    pub fn new(config: StoreConfig, fetcher: Arc<dyn CacheFetcher<T>>) -> RelicResult<Self> {
        Self::with_directory(StoreDirectory::global(), config, fetcher)
    }

    /// Create a cache registered in the given directory.
    pub fn with_directory(
        directory: &StoreDirectory,
        config: StoreConfig,
        fetcher: Arc<dyn CacheFetcher<T>>,
    ) -> RelicResult<Self> {
        directory.claim(&config.name)?;
        Ok(Self {
            name: config.name,
            max_age_seconds: config.max_age_seconds,
            state: Mutex::new(CacheState {
                entries: IndexMap::new(),
                last_fetch_all: None,
            }),
            locks: Arc::new(Mutex::new(LockTable::default())),
            fetcher,
        })
    }

    /// The store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serve the requested ids, fetching whatever is missing or expired.
    ///
    /// Fetch locks are taken for every requested id, not just the missing
    /// ones: two overlapping calls must not each fetch their half of a
    /// shared id set. Missing-in-backend ids are simply absent from the
    /// result.
    pub async fn get(&self, ids: &[ObjectId]) -> RelicResult<IndexMap<ObjectId, T>> {
        loop {
            let now = Utc::now();
            let (mut found, missing) = self.classify(ids, now);

            if missing.is_empty() {
                return Ok(found);
            }

            let guard = match self.try_lock_ids(ids) {
                Ok(guard) => guard,
                Err(blockers) => {
                    tracing::debug!(
                        store = %self.name,
                        "ongoing fetch detected; waiting before retrying get"
                    );
                    wait_for_release(blockers).await;
                    continue;
                }
            };

            tracing::debug!(
                store = %self.name,
                count = missing.len(),
                "fetching objects from backend"
            );
            let fresh = self.fetcher.fetch_by_ids(&missing).await?;
            self.update(fresh.clone(), Utc::now());
            drop(guard);

            found.extend(fresh);
            return Ok(found);
        }
    }

    /// Serve the entire object set.
    ///
    /// If the last whole-set fetch is younger than the max age this returns
    /// the full cache contents; otherwise it takes the whole-set lock
    /// (mutually exclusive with every per-id lock, in both directions),
    /// fetches everything, and replaces the cache wholesale.
    pub async fn get_all(&self) -> RelicResult<IndexMap<ObjectId, T>> {
        loop {
            if !self.fetch_all_due(Utc::now()) {
                return Ok(self.snapshot());
            }

            let guard = match self.try_lock_whole_set() {
                Ok(guard) => guard,
                Err(blockers) => {
                    tracing::debug!(
                        store = %self.name,
                        "ongoing fetch detected; waiting before retrying get_all"
                    );
                    wait_for_release(blockers).await;
                    continue;
                }
            };

            tracing::debug!(store = %self.name, "fetching all objects from backend");
            let all = self.fetcher.fetch_all().await?;
            {
                let mut state = self.state.lock().unwrap();
                let now = Utc::now();
                state.entries.clear();
                for (id, value) in all {
                    state.entries.insert(id, CacheEntry { value, fetched_at: now });
                }
                state.last_fetch_all = Some(now);
            }
            drop(guard);

            return Ok(self.snapshot());
        }
    }

    /// Write values straight into the cache with the given timestamp.
    ///
    /// Never touches the backend; the write path uses this to make
    /// just-written data visible without waiting for the TTL. Entries are
    /// removed before re-insertion so insertion order tracks recency.
    pub fn update(&self, values: impl IntoIterator<Item = (ObjectId, T)>, now: Timestamp) {
        let mut state = self.state.lock().unwrap();
        for (id, value) in values {
            state.entries.shift_remove(&id);
            state.entries.insert(id, CacheEntry { value, fetched_at: now });
        }
    }

    /// Remove the given entries.
    pub fn delete(&self, ids: &[ObjectId]) {
        let mut state = self.state.lock().unwrap();
        for id in ids {
            state.entries.shift_remove(id);
        }
    }

    /// Remove every entry except the given ids.
    pub fn delete_all_but(&self, keep: &[ObjectId]) {
        let keep: HashSet<&ObjectId> = keep.iter().collect();
        let mut state = self.state.lock().unwrap();
        state.entries.retain(|id, _| keep.contains(id));
    }

    /// Remove every entry and forget the last whole-set fetch, forcing the
    /// next `get_all` to hit the backend.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
        state.last_fetch_all = None;
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().entries.is_empty()
    }

    /// Whether an id is currently cached (expired or not).
    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().unwrap().entries.contains_key(id)
    }

    /// Currently cached ids in insertion order.
    pub fn cached_ids(&self) -> Vec<ObjectId> {
        self.state.lock().unwrap().entries.keys().cloned().collect()
    }

    fn classify(
        &self,
        ids: &[ObjectId],
        now: Timestamp,
    ) -> (IndexMap<ObjectId, T>, Vec<ObjectId>) {
        let mut state = self.state.lock().unwrap();
        let mut found = IndexMap::new();
        let mut missing = Vec::new();

        for id in ids {
            let cached = match state.entries.get(id) {
                Some(entry) if !self.is_expired(entry.fetched_at, now) => {
                    Some(entry.value.clone())
                }
                Some(_) => None,
                None => {
                    missing.push(id.clone());
                    continue;
                }
            };
            match cached {
                Some(value) => {
                    found.insert(id.clone(), value);
                }
                None => {
                    tracing::debug!(store = %self.name, id = %id, "evicting expired entry");
                    state.entries.shift_remove(id);
                    missing.push(id.clone());
                }
            }
        }

        (found, missing)
    }

    fn is_expired(&self, fetched_at: Timestamp, now: Timestamp) -> bool {
        self.max_age_seconds >= 0
            && now.signed_duration_since(fetched_at) > Duration::seconds(self.max_age_seconds)
    }

    fn fetch_all_due(&self, now: Timestamp) -> bool {
        let state = self.state.lock().unwrap();
        match state.last_fetch_all {
            None => true,
            Some(last) => {
                self.max_age_seconds >= 0
                    && now.signed_duration_since(last) >= Duration::seconds(self.max_age_seconds)
            }
        }
    }

    fn snapshot(&self) -> IndexMap<ObjectId, T> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.value.clone()))
            .collect()
    }

    fn try_lock_ids(&self, ids: &[ObjectId]) -> Result<FetchGuard, Vec<LockSignal>> {
        let mut table = self.locks.lock().unwrap();

        let mut blockers: Vec<LockSignal> = ids
            .iter()
            .filter_map(|id| table.by_id.get(id).cloned())
            .collect();
        if let Some(whole_set) = &table.whole_set {
            blockers.push(whole_set.clone());
        }
        if !blockers.is_empty() {
            return Err(blockers);
        }

        let (tx, rx) = watch::channel(());
        for id in ids {
            table.by_id.insert(id.clone(), rx.clone());
        }
        Ok(FetchGuard {
            table: Arc::clone(&self.locks),
            ids: ids.to_vec(),
            whole_set: false,
            _release: tx,
        })
    }

    fn try_lock_whole_set(&self) -> Result<FetchGuard, Vec<LockSignal>> {
        let mut table = self.locks.lock().unwrap();

        let mut blockers: Vec<LockSignal> = table.by_id.values().cloned().collect();
        if let Some(whole_set) = &table.whole_set {
            blockers.push(whole_set.clone());
        }
        if !blockers.is_empty() {
            return Err(blockers);
        }

        let (tx, rx) = watch::channel(());
        table.whole_set = Some(rx);
        Ok(FetchGuard {
            table: Arc::clone(&self.locks),
            ids: Vec::new(),
            whole_set: true,
            _release: tx,
        })
    }
}

impl<T> std::fmt::Debug for ObjectCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("name", &self.name)
            .field("max_age_seconds", &self.max_age_seconds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relic_core::RelicError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fetcher stub that counts per-id fetches and can fail on demand.
    #[derive(Default)]
    struct CountingFetcher {
        objects: Mutex<IndexMap<ObjectId, String>>,
        fetch_counts: Mutex<HashMap<ObjectId, usize>>,
        fetch_all_calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        yield_in_fetch: bool,
    }

    impl CountingFetcher {
        fn with_objects(pairs: &[(&str, &str)]) -> Arc<Self> {
            let fetcher = Self::default();
            {
                let mut objects = fetcher.objects.lock().unwrap();
                for (id, value) in pairs {
                    objects.insert(id.to_string(), value.to_string());
                }
            }
            Arc::new(fetcher)
        }

        fn yielding(pairs: &[(&str, &str)]) -> Arc<Self> {
            let mut fetcher = Self::default();
            fetcher.yield_in_fetch = true;
            {
                let mut objects = fetcher.objects.lock().unwrap();
                for (id, value) in pairs {
                    objects.insert(id.to_string(), value.to_string());
                }
            }
            Arc::new(fetcher)
        }

        fn count(&self, id: &str) -> usize {
            *self.fetch_counts.lock().unwrap().get(id).unwrap_or(&0)
        }
    }

    #[async_trait]
    impl CacheFetcher<String> for CountingFetcher {
        async fn fetch_by_ids(&self, ids: &[ObjectId]) -> RelicResult<IndexMap<ObjectId, String>> {
            if self.yield_in_fetch {
                tokio::task::yield_now().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(relic_core::StorageError::FetchFailed {
                    model: "stub".to_string(),
                    reason: "backend down".to_string(),
                }
                .into());
            }
            let mut counts = self.fetch_counts.lock().unwrap();
            for id in ids {
                *counts.entry(id.clone()).or_insert(0) += 1;
            }
            let objects = self.objects.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| objects.get(id).map(|v| (id.clone(), v.clone())))
                .collect())
        }

        async fn fetch_all(&self) -> RelicResult<IndexMap<ObjectId, String>> {
            if self.yield_in_fetch {
                tokio::task::yield_now().await;
            }
            self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.objects.lock().unwrap().clone())
        }
    }

    fn test_cache(
        name: &str,
        max_age_seconds: i64,
        fetcher: Arc<CountingFetcher>,
    ) -> ObjectCache<String> {
        let directory = StoreDirectory::new();
        ObjectCache::with_directory(
            &directory,
            StoreConfig::new(name).with_max_age_seconds(max_age_seconds),
            fetcher,
        )
        .expect("cache creation should succeed")
    }

    fn ids(names: &[&str]) -> Vec<ObjectId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_get_fetches_then_serves_from_cache() {
        let fetcher = CountingFetcher::with_objects(&[("a", "1"), ("b", "2")]);
        let cache = test_cache("user", 300, Arc::clone(&fetcher));

        let first = cache.get(&ids(&["a", "b"])).await.expect("get");
        assert_eq!(first.len(), 2);
        let second = cache.get(&ids(&["a", "b"])).await.expect("get");
        assert_eq!(second["a"], "1");

        assert_eq!(fetcher.count("a"), 1);
        assert_eq!(fetcher.count("b"), 1);
    }

    #[tokio::test]
    async fn test_missing_backend_ids_are_absent() {
        let fetcher = CountingFetcher::with_objects(&[("a", "1")]);
        let cache = test_cache("user", 300, Arc::clone(&fetcher));

        let result = cache.get(&ids(&["a", "ghost"])).await.expect("get");
        assert_eq!(result.len(), 1);
        assert!(!result.contains_key("ghost"));
    }

    #[tokio::test]
    async fn test_overlapping_gets_coalesce_to_one_fetch_per_id() {
        let fetcher = CountingFetcher::yielding(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let cache = test_cache("user", 300, Arc::clone(&fetcher));

        let (left, right) = tokio::join!(
            cache.get(&ids(&["a", "b"])),
            cache.get(&ids(&["b", "c"])),
        );
        let left = left.expect("left get");
        let right = right.expect("right get");

        assert_eq!(left["b"], "2");
        assert_eq!(right["b"], "2");
        assert_eq!(fetcher.count("a"), 1);
        assert_eq!(fetcher.count("b"), 1);
        assert_eq!(fetcher.count("c"), 1);
    }

    #[tokio::test]
    async fn test_get_waits_for_in_flight_fetch_all() {
        let fetcher = CountingFetcher::yielding(&[("a", "1"), ("b", "2")]);
        let cache = test_cache("user", 300, Arc::clone(&fetcher));

        let (all, one) = tokio::join!(cache.get_all(), cache.get(&ids(&["a"])));
        let all = all.expect("get_all");
        let one = one.expect("get");

        assert_eq!(all.len(), 2);
        assert_eq!(one["a"], "1");
        // The get reused the freshly populated cache instead of fetching.
        assert_eq!(fetcher.count("a"), 0);
        assert_eq!(fetcher.fetch_all_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_refetch() {
        let fetcher = CountingFetcher::with_objects(&[("a", "fresh")]);
        let cache = test_cache("user", 1, Arc::clone(&fetcher));

        // An entry half a max-age old is served from cache.
        cache.update(
            [("a".to_string(), "stale".to_string())],
            Utc::now() - Duration::milliseconds(500),
        );
        let result = cache.get(&ids(&["a"])).await.expect("get");
        assert_eq!(result["a"], "stale");
        assert_eq!(fetcher.count("a"), 0);

        // Past the max age it is evicted and re-fetched.
        cache.update(
            [("a".to_string(), "stale".to_string())],
            Utc::now() - Duration::milliseconds(1500),
        );
        let result = cache.get(&ids(&["a"])).await.expect("get");
        assert_eq!(result["a"], "fresh");
        assert_eq!(fetcher.count("a"), 1);
    }

    #[tokio::test]
    async fn test_negative_max_age_never_expires() {
        let fetcher = CountingFetcher::with_objects(&[("a", "fresh")]);
        let cache = test_cache("user", NEVER_EXPIRE, Arc::clone(&fetcher));

        cache.update(
            [("a".to_string(), "ancient".to_string())],
            Utc::now() - Duration::hours(24),
        );
        let result = cache.get(&ids(&["a"])).await.expect("get");
        assert_eq!(result["a"], "ancient");
        assert_eq!(fetcher.count("a"), 0);
    }

    #[tokio::test]
    async fn test_negative_max_age_fetches_all_exactly_once() {
        let fetcher = CountingFetcher::with_objects(&[("a", "1")]);
        let cache = test_cache("user", NEVER_EXPIRE, Arc::clone(&fetcher));

        cache.get_all().await.expect("get_all");
        cache.get_all().await.expect("get_all");
        assert_eq!(fetcher.fetch_all_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_all_replaces_cache_wholesale() {
        let fetcher = CountingFetcher::with_objects(&[("a", "1")]);
        let cache = test_cache("user", 0, Arc::clone(&fetcher));

        // A write-through entry the backend does not know about...
        cache.update([("orphan".to_string(), "x".to_string())], Utc::now());
        let all = cache.get_all().await.expect("get_all");

        // ...is gone after a whole-set fetch: clear-then-insert, not merge.
        assert_eq!(all.len(), 1);
        assert!(!cache.contains("orphan"));
    }

    #[tokio::test]
    async fn test_fetch_failure_releases_locks() {
        let fetcher = CountingFetcher::with_objects(&[("a", "1")]);
        let cache = test_cache("user", 300, Arc::clone(&fetcher));

        fetcher.fail.store(true, Ordering::SeqCst);
        let err = cache.get(&ids(&["a"])).await.unwrap_err();
        assert!(matches!(err, RelicError::Storage(_)));
        assert!(!cache.contains("a"));

        // The failed fetch must not leave a stuck lock behind.
        fetcher.fail.store(false, Ordering::SeqCst);
        let result = cache.get(&ids(&["a"])).await.expect("get");
        assert_eq!(result["a"], "1");
    }

    #[tokio::test]
    async fn test_update_moves_entry_to_newest_position() {
        let fetcher = CountingFetcher::with_objects(&[]);
        let cache = test_cache("user", 300, fetcher);

        let now = Utc::now();
        cache.update(
            [
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
            now,
        );
        cache.update([("a".to_string(), "1b".to_string())], now);

        assert_eq!(cache.cached_ids(), ids(&["b", "a"]));
    }

    #[tokio::test]
    async fn test_delete_all_but_keeps_only_requested() {
        let fetcher = CountingFetcher::with_objects(&[]);
        let cache = test_cache("user", 300, fetcher);

        cache.update(
            [
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "3".to_string()),
            ],
            Utc::now(),
        );
        cache.delete_all_but(&ids(&["b"]));
        assert_eq!(cache.cached_ids(), ids(&["b"]));
    }

    #[tokio::test]
    async fn test_clear_forces_next_get_all_to_fetch() {
        let fetcher = CountingFetcher::with_objects(&[("a", "1")]);
        let cache = test_cache("user", 300, Arc::clone(&fetcher));

        cache.get_all().await.expect("get_all");
        cache.clear();
        cache.get_all().await.expect("get_all");
        assert_eq!(fetcher.fetch_all_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_store_name_fails() {
        let directory = StoreDirectory::new();
        let fetcher = CountingFetcher::with_objects(&[]);

        let first = ObjectCache::<String>::with_directory(
            &directory,
            StoreConfig::new("user"),
            Arc::clone(&fetcher) as Arc<dyn CacheFetcher<String>>,
        );
        assert!(first.is_ok());

        let second = ObjectCache::<String>::with_directory(
            &directory,
            StoreConfig::new("user"),
            fetcher as Arc<dyn CacheFetcher<String>>,
        );
        assert!(matches!(
            second.unwrap_err(),
            RelicError::Cache(relic_core::CacheError::DuplicateStore { .. })
        ));
    }

    mod ordering_props {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Update(u8),
            Delete(u8),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..8).prop_map(Op::Update),
                (0u8..8).prop_map(Op::Delete),
            ]
        }

        proptest! {
            /// After any sequence of write-throughs and deletes, iteration
            /// order is exactly "least to most recently written" over the
            /// surviving ids.
            #[test]
            fn prop_cache_order_tracks_recency(ops in proptest::collection::vec(op_strategy(), 0..64)) {
                let directory = StoreDirectory::new();
                let fetcher = CountingFetcher::with_objects(&[]);
                let cache = ObjectCache::with_directory(
                    &directory,
                    StoreConfig::new("prop"),
                    fetcher as Arc<dyn CacheFetcher<String>>,
                )
                .expect("cache");

                let mut expected: Vec<ObjectId> = Vec::new();
                let now = Utc::now();
                for op in &ops {
                    match op {
                        Op::Update(n) => {
                            let id = format!("obj-{n}");
                            expected.retain(|existing| existing != &id);
                            expected.push(id.clone());
                            cache.update([(id, "value".to_string())], now);
                        }
                        Op::Delete(n) => {
                            let id = format!("obj-{n}");
                            expected.retain(|existing| existing != &id);
                            cache.delete(&[id]);
                        }
                    }
                }

                prop_assert_eq!(cache.cached_ids(), expected);
            }
        }
    }
}
