use crate::accelerate::strategy::{validate_tags, CacheStrategy, InvalidateInput, InvalidationReceipt};
use crate::error::DbError;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

struct CacheEntry {
    value: JsonValue,
    tags: Vec<String>,
    stored_at: Instant,
    last_modified: DateTime<Utc>,
    fresh_for: Duration,
    stale_for: Duration,
}

/// Outcome of a cache lookup. Values are cloned out so no map guard outlives
/// the call.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Fresh { value: JsonValue, last_modified: DateTime<Utc> },
    Stale { value: JsonValue, last_modified: DateTime<Utc> },
    Miss,
}

/// Process-wide store of serialized query results.
///
/// Every invalidation bumps a generation counter. Writers capture the
/// generation before querying the store and drop their result if it changed,
/// so a query that raced an invalidation cannot put pre-invalidation data back.
/// Writers check the generation and store under the shared side of `gate`;
/// invalidations bump and evict under the exclusive side.
pub struct CacheStore {
    entries: DashMap<String, CacheEntry>,
    refreshing: DashSet<String>,
    generation: AtomicU64,
    gate: RwLock<()>,
    max_entries: usize,
}

impl CacheStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            refreshing: DashSet::new(),
            generation: AtomicU64::new(0),
            gate: RwLock::new(()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn lookup(&self, key: &str) -> Lookup {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            let age = now.saturating_duration_since(entry.stored_at);
            if age < entry.fresh_for {
                return Lookup::Fresh { value: entry.value.clone(), last_modified: entry.last_modified };
            }
            if age < entry.fresh_for + entry.stale_for {
                return Lookup::Stale { value: entry.value.clone(), last_modified: entry.last_modified };
            }
        }
        // Only drop the entry if it is still expired; a refresh may have replaced it meanwhile.
        self.entries.remove_if(key, |_, entry| {
            now.saturating_duration_since(entry.stored_at) >= entry.fresh_for + entry.stale_for
        });
        Lookup::Miss
    }

    /// Stores `value` unless an invalidation happened since `generation` was read.
    /// Returns whether the value was stored.
    pub fn insert(&self, key: &str, value: JsonValue, strategy: &CacheStrategy, generation: u64) -> bool {
        let _write = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.generation() != generation {
            tracing::debug!(key, "Discarding cache write that raced an invalidation.");
            return false;
        }
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                tags: strategy.tags.clone(),
                stored_at: Instant::now(),
                last_modified: Utc::now(),
                fresh_for: strategy.fresh_for(),
                stale_for: strategy.stale_for(),
            },
        );
        true
    }

    /// Marks `key` as being refreshed. Returns false if a refresh is already running.
    pub fn begin_refresh(&self, key: &str) -> bool {
        self.refreshing.insert(key.to_string())
    }

    pub fn end_refresh(&self, key: &str) {
        self.refreshing.remove(key);
    }

    pub fn is_refreshing(&self, key: &str) -> bool {
        self.refreshing.contains(key)
    }

    /// Evicts every entry carrying at least one of the given tags.
    pub fn invalidate(&self, input: &InvalidateInput) -> Result<InvalidationReceipt, DbError> {
        validate_tags(&input.tags)?;
        let evicted = {
            let _exclusive = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            self.generation.fetch_add(1, Ordering::AcqRel);
            let before = self.entries.len();
            self.entries.retain(|_, entry| !entry.tags.iter().any(|t| input.tags.contains(t)));
            before.saturating_sub(self.entries.len())
        };

        let receipt = InvalidationReceipt { request_id: Uuid::new_v4(), evicted };
        tracing::info!(request_id = %receipt.request_id, tags = ?input.tags, evicted, "Cache invalidated by tag.");
        Ok(receipt)
    }

    /// Evicts everything.
    pub fn invalidate_all(&self) -> InvalidationReceipt {
        let evicted = {
            let _exclusive = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            self.generation.fetch_add(1, Ordering::AcqRel);
            let evicted = self.entries.len();
            self.entries.clear();
            evicted
        };

        let receipt = InvalidationReceipt { request_id: Uuid::new_v4(), evicted };
        tracing::info!(request_id = %receipt.request_id, evicted, "Cache invalidated.");
        receipt
    }

    // Linear scan; only runs when the store is full.
    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            tracing::trace!(%key, "Evicted oldest cache entry.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put(store: &CacheStore, key: &str, strategy: &CacheStrategy) {
        assert!(store.insert(key, json!(key), strategy, store.generation()));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_age_from_fresh_to_stale_to_gone() {
        let store = CacheStore::new(10);
        put(&store, "k", &CacheStrategy::ttl(10).with_swr(5));

        assert!(matches!(store.lookup("k"), Lookup::Fresh { .. }));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(matches!(store.lookup("k"), Lookup::Stale { .. }));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.lookup("k"), Lookup::Miss);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn swr_only_entries_are_stale_immediately() {
        let store = CacheStore::new(10);
        put(&store, "k", &CacheStrategy::swr(5));
        assert!(matches!(store.lookup("k"), Lookup::Stale { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn full_store_evicts_the_oldest_entry() {
        let store = CacheStore::new(2);
        let strategy = CacheStrategy::ttl(60);
        put(&store, "a", &strategy);
        tokio::time::advance(Duration::from_secs(1)).await;
        put(&store, "b", &strategy);
        tokio::time::advance(Duration::from_secs(1)).await;
        put(&store, "c", &strategy);

        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup("a"), Lookup::Miss);
        assert!(matches!(store.lookup("c"), Lookup::Fresh { .. }));
    }

    #[test]
    fn writes_that_race_an_invalidation_are_dropped() {
        let store = CacheStore::new(10);
        let generation = store.generation();
        store.invalidate_all();
        assert!(!store.insert("k", json!(1), &CacheStrategy::ttl(60), generation));
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_invalidation_never_keeps_an_older_write() {
        use std::sync::{Arc, Barrier};

        let strategy = CacheStrategy::ttl(600);
        for _ in 0..2_000 {
            let store = Arc::new(CacheStore::new(10));
            let barrier = Arc::new(Barrier::new(2));
            let generation = store.generation();

            let writer = {
                let (store, barrier, strategy) = (store.clone(), barrier.clone(), strategy.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    store.insert("k", json!(1), &strategy, generation)
                })
            };
            let invalidator = {
                let (store, barrier) = (store.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    store.invalidate_all();
                })
            };

            let stored = writer.join().unwrap();
            invalidator.join().unwrap();
            // Either the write landed first and was evicted, or it saw the new generation.
            assert!(store.is_empty(), "write stored = {stored}, entry survived invalidation");
        }
    }

    #[test]
    fn tag_invalidation_only_touches_tagged_entries() {
        let store = CacheStore::new(10);
        put(&store, "users", &CacheStrategy::ttl(60).with_tags(["users"]));
        put(&store, "both", &CacheStrategy::ttl(60).with_tags(["users", "orders"]));
        put(&store, "plain", &CacheStrategy::ttl(60));

        let receipt = store.invalidate(&InvalidateInput::tags(["users"])).unwrap();
        assert_eq!(receipt.evicted, 2);
        assert_eq!(store.len(), 1);

        assert!(store.invalidate(&InvalidateInput::tags(["bad tag"])).is_err());
    }

    #[test]
    fn only_one_refresh_per_key() {
        let store = CacheStore::new(10);
        assert!(store.begin_refresh("k"));
        assert!(!store.begin_refresh("k"));
        store.end_refresh("k");
        assert!(!store.is_refreshing("k"));
    }
}
