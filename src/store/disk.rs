use crate::core::cache::KeyValueCollection;
use anyhow::Result;
use async_trait::async_trait;
use fjall::PartitionHandle;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<SystemTime>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| SystemTime::now() > expires_at)
    }
}

/// A collection backed by one fjall partition.
pub struct DiskCollection {
    partition: PartitionHandle,
}

impl DiskCollection {
    pub fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }

    fn decode(raw: &[u8]) -> Result<CacheEntry> {
        Ok(serde_json::from_slice(raw)?)
    }

    fn live_entries(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut live = Vec::new();
        for item in self.partition.prefix(prefix) {
            let (key, raw) = item?;
            let entry = Self::decode(&raw)?;
            if !entry.is_expired() {
                live.push((key.to_vec(), entry.value));
            }
        }
        Ok(live)
    }
}

#[async_trait]
impl KeyValueCollection for DiskCollection {
    async fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let res: Result<Option<Vec<u8>>> = (|| {
            let Some(raw) = self.partition.get(key)? else {
                debug!("Cache MISS for key: {}", String::from_utf8_lossy(key));
                return Ok(None);
            };
            let entry = Self::decode(&raw)?;
            if entry.is_expired() {
                debug!("Cache entry expired for key: {}", String::from_utf8_lossy(key));
                self.partition.remove(key)?;
                return Ok(None);
            }
            Ok(Some(entry.value))
        })();

        match res {
            Ok(val) => val,
            Err(e) => {
                debug!("DiskCollection get error: {}", e);
                None
            }
        }
    }

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) {
        let res: Result<()> = (|| {
            let entry = CacheEntry {
                value: value.to_vec(),
                expires_at: ttl.map(|d| SystemTime::now() + d),
            };
            self.partition.insert(key, serde_json::to_vec(&entry)?)?;
            Ok(())
        })();
        if let Err(e) = res {
            debug!("DiskCollection put error: {}", e);
        }
    }

    async fn remove(&self, key: &[u8]) {
        if let Err(e) = self.partition.remove(key) {
            debug!("DiskCollection remove error: {}", e);
        }
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.live_entries(prefix).unwrap_or_else(|e| {
            debug!("DiskCollection scan error: {}", e);
            Vec::new()
        })
    }

    async fn clear(&self) {
        let keys: Vec<_> = self
            .partition
            .keys()
            .filter_map(|key| key.ok())
            .collect();
        for key in keys {
            if let Err(e) = self.partition.remove(key) {
                debug!("DiskCollection clear error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjall::PartitionCreateOptions;
    use tempfile::tempdir;
    use tokio::time::sleep;

    fn open(dir: &std::path::Path) -> DiskCollection {
        let keyspace = fjall::Config::new(dir).open().unwrap();
        let partition = keyspace
            .open_partition("test", PartitionCreateOptions::default())
            .unwrap();
        DiskCollection::new(partition)
    }

    #[tokio::test]
    async fn test_disk_get_put() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path());

        assert!(cache.get(b"key1").await.is_none());
        cache.put(b"key1", b"123", None).await;
        assert_eq!(cache.get(b"key1").await, Some(b"123".to_vec()));
        assert!(cache.get(b"key2").await.is_none());
    }

    #[tokio::test]
    async fn test_disk_ttl_expiration() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path());

        cache
            .put(b"key1", b"123", Some(Duration::from_millis(10)))
            .await;
        assert_eq!(cache.get(b"key1").await, Some(b"123".to_vec()));

        sleep(Duration::from_millis(20)).await;
        assert!(cache.get(b"key1").await.is_none());
    }

    #[tokio::test]
    async fn test_disk_scan_and_clear() {
        let dir = tempdir().unwrap();
        let cache = open(dir.path());

        cache.put(b"a|2", b"2", None).await;
        cache.put(b"a|1", b"1", None).await;
        cache.put(b"b|1", b"3", None).await;

        let scanned = cache.scan_prefix(b"a|").await;
        assert_eq!(
            scanned,
            vec![
                (b"a|1".to_vec(), b"1".to_vec()),
                (b"a|2".to_vec(), b"2".to_vec())
            ]
        );

        cache.remove(b"a|1").await;
        assert_eq!(cache.scan_prefix(b"a|").await.len(), 1);

        cache.clear().await;
        assert!(cache.scan_prefix(b"").await.is_empty());
    }
}
