use crate::core::cache::{CachedSnapshot, MarketCache};
use crate::core::market::MarketKey;
use anyhow::{Context, Result};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

const SNAPSHOT_PARTITION: &str = "market_snapshots";

/// On-disk copy of the market cache, kept between runs.
///
/// Keys and values are JSON encoded [`MarketKey`]s and [`CachedSnapshot`]s, so
/// the original fetch time survives a restart and staleness is judged correctly.
pub struct SnapshotStore {
    keyspace: Keyspace,
    partition: PartitionHandle,
}

impl SnapshotStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        let keyspace = Config::new(path)
            .open()
            .with_context(|| format!("Failed to open cache store at {}", path.display()))?;
        let partition =
            keyspace.open_partition(SNAPSHOT_PARTITION, PartitionCreateOptions::default())?;
        debug!("Opened snapshot store at {}", path.display());
        Ok(Self {
            keyspace,
            partition,
        })
    }

    /// Copies every stored snapshot into `cache`. Entries that fail to decode are
    /// skipped.
    pub fn load_into(&self, cache: &MarketCache) -> Result<usize> {
        let mut loaded = 0;
        for item in self.partition.iter() {
            let (key, value) = item?;
            let decoded = serde_json::from_slice::<MarketKey>(&key).and_then(|key| {
                serde_json::from_slice::<CachedSnapshot>(&value).map(|entry| (key, entry))
            });
            match decoded {
                Ok((key, entry)) => {
                    cache.insert(key, entry);
                    loaded += 1;
                }
                Err(e) => warn!(error = %e, "Skipping unreadable cache entry"),
            }
        }
        debug!(loaded, "Loaded cached snapshots from disk");
        Ok(loaded)
    }

    /// Writes every cache entry to disk, overwriting older copies.
    pub fn persist_from(&self, cache: &MarketCache) -> Result<usize> {
        let entries = cache.entries();
        let mut batch = self.keyspace.batch();
        for (key, entry) in &entries {
            batch.insert(
                &self.partition,
                serde_json::to_vec(key)?,
                serde_json::to_vec(entry)?,
            );
        }
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!(written = entries.len(), "Persisted cached snapshots");
        Ok(entries.len())
    }

    /// Makes the store mirror `cache` exactly, dropping stored entries that are no
    /// longer cached.
    pub fn replace_all(&self, cache: &MarketCache) -> Result<usize> {
        let entries = cache.entries();
        let keep: HashSet<Vec<u8>> = entries
            .iter()
            .map(|(key, _)| serde_json::to_vec(key))
            .collect::<Result<_, _>>()?;

        let mut batch = self.keyspace.batch();
        let mut removed = 0;
        for key in self.partition.keys() {
            let key = key?;
            if !keep.contains(key.as_ref()) {
                batch.remove(&self.partition, key);
                removed += 1;
            }
        }
        for (key, entry) in &entries {
            batch.insert(
                &self.partition,
                serde_json::to_vec(key)?,
                serde_json::to_vec(entry)?,
            );
        }
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!(removed, kept = entries.len(), "Replaced stored snapshots");
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.partition.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.partition.is_empty()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::{Listing, ListingsSnapshot};
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn entry(item_id: u32, minutes_old: i64) -> CachedSnapshot {
        CachedSnapshot {
            snapshot: ListingsSnapshot {
                item_id,
                market: "Aether".to_string(),
                listings: vec![Listing {
                    world_name: "Siren".to_string(),
                    quantity: 3,
                    price_per_unit: 120,
                    retainer_name: "Ayla".to_string(),
                    is_hq: true,
                    region: None,
                }],
                average_price: 115.0,
                last_upload: None,
            },
            fetched_at: Utc::now() - Duration::minutes(minutes_old),
        }
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let cache = MarketCache::new();
        let original = entry(5057, 45);
        cache.insert(MarketKey::new("Aether", 5057), original.clone());
        cache.insert(MarketKey::new("Aether", 5058), entry(5058, 1));

        {
            let store = SnapshotStore::open(dir.path()).unwrap();
            assert_eq!(store.persist_from(&cache).unwrap(), 2);
        }

        let store = SnapshotStore::open(dir.path()).unwrap();
        let restored = MarketCache::new();
        assert_eq!(store.load_into(&restored).unwrap(), 2);
        assert_eq!(
            restored.get(&MarketKey::new("aether", 5057)),
            Some(original)
        );
    }

    #[test]
    fn test_replace_all_drops_pruned_entries() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let cache = MarketCache::new();
        cache.insert(MarketKey::new("Aether", 1), entry(1, 600));
        cache.insert(MarketKey::new("Aether", 2), entry(2, 5));
        store.persist_from(&cache).unwrap();
        assert_eq!(store.len().unwrap(), 2);

        cache.remove_older_than(Utc::now() - Duration::hours(1));
        assert_eq!(store.replace_all(&cache).unwrap(), 1);

        let restored = MarketCache::new();
        store.load_into(&restored).unwrap();
        assert_eq!(restored.len(), 1);
        assert!(restored.contains(&MarketKey::new("Aether", 2)));
    }

    #[test]
    fn test_empty_store() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open(&dir.path().join("nested")).unwrap();
        assert!(store.is_empty().unwrap());
        assert_eq!(store.load_into(&MarketCache::new()).unwrap(), 0);
    }
}
