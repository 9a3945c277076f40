use crate::core::market::{ListingsSnapshot, MarketKey};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub snapshot: ListingsSnapshot,
    pub fetched_at: DateTime<Utc>,
}

impl CachedSnapshot {
    pub fn now(snapshot: ListingsSnapshot) -> Self {
        Self {
            snapshot,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Shared price cache keyed by (market, item).
///
/// Safe to read and write from many tasks without caller-side locking.
#[derive(Debug, Default)]
pub struct MarketCache {
    entries: DashMap<MarketKey, CachedSnapshot>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &MarketKey) -> Option<CachedSnapshot> {
        let value = self.entries.get(key).map(|entry| entry.value().clone());
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "Cache HIT");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "Cache MISS");
        }
        value
    }

    pub fn contains(&self, key: &MarketKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Stores a freshly fetched snapshot stamped with the current time.
    pub fn store(&self, key: MarketKey, snapshot: ListingsSnapshot) {
        self.insert(key, CachedSnapshot::now(snapshot));
    }

    pub fn insert(&self, key: MarketKey, entry: CachedSnapshot) {
        debug!(%key, "Cache PUT");
        self.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies every entry out of the cache.
    pub fn entries(&self) -> Vec<(MarketKey, CachedSnapshot)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            entries: 0,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            oldest: None,
            newest: None,
        };
        for entry in self.entries.iter() {
            let fetched_at = entry.value().fetched_at;
            stats.entries += 1;
            stats.oldest = Some(stats.oldest.map_or(fetched_at, |t| t.min(fetched_at)));
            stats.newest = Some(stats.newest.map_or(fetched_at, |t| t.max(fetched_at)));
        }
        stats
    }

    /// Removes entries fetched before `cutoff`. Returns how many were removed.
    pub fn remove_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.fetched_at >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        debug!(removed, %cutoff, "Cache EVICT by age");
        removed
    }

    /// Removes the `count` least recently fetched entries.
    pub fn remove_oldest(&self, count: usize) -> usize {
        let mut by_age: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.value().fetched_at, entry.key().clone()))
            .collect();
        by_age.sort();

        let removed = by_age
            .into_iter()
            .take(count)
            .filter(|(_, key)| self.entries.remove(key).is_some())
            .count();
        debug!(removed, "Cache EVICT oldest");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn snapshot(item_id: u32) -> ListingsSnapshot {
        ListingsSnapshot {
            item_id,
            market: "aether".to_string(),
            listings: Vec::new(),
            average_price: 0.0,
            last_upload: None,
        }
    }

    fn entry_aged(item_id: u32, minutes: i64) -> CachedSnapshot {
        CachedSnapshot {
            snapshot: snapshot(item_id),
            fetched_at: Utc::now() - Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_cache_get_store() {
        let cache = MarketCache::new();
        let key = MarketKey::new("Aether", 1);

        // Initially, cache is empty
        assert!(cache.get(&key).is_none());
        assert!(!cache.contains(&key));

        cache.store(key.clone(), snapshot(1));

        assert!(cache.contains(&key));
        assert_eq!(cache.get(&key).map(|e| e.snapshot.item_id), Some(1));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_remove_older_than() {
        let cache = MarketCache::new();
        cache.insert(MarketKey::new("aether", 1), entry_aged(1, 120));
        cache.insert(MarketKey::new("aether", 2), entry_aged(2, 5));

        let removed = cache.remove_older_than(Utc::now() - Duration::minutes(60));

        assert_eq!(removed, 1);
        assert!(!cache.contains(&MarketKey::new("aether", 1)));
        assert!(cache.contains(&MarketKey::new("aether", 2)));
    }

    #[test]
    fn test_remove_oldest() {
        let cache = MarketCache::new();
        cache.insert(MarketKey::new("aether", 1), entry_aged(1, 30));
        cache.insert(MarketKey::new("aether", 2), entry_aged(2, 90));
        cache.insert(MarketKey::new("aether", 3), entry_aged(3, 60));

        assert_eq!(cache.remove_oldest(2), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&MarketKey::new("aether", 1)));

        let stats = cache.stats();
        assert_eq!(stats.oldest, stats.newest);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(MarketCache::new());
        let tasks: Vec<_> = (0..32u32)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let key = MarketKey::new("aether", i % 8);
                    cache.store(key.clone(), snapshot(i % 8));
                    cache.get(&key).is_some()
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(cache.len(), 8);
    }
}
