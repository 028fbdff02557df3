use crate::core::cache::KeyValueCollection;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct CacheValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheValue {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= Instant::now())
    }
}

/// In-memory collection, ordered by key so prefix scans match the disk store.
#[derive(Default)]
pub struct MemoryCollection {
    inner: Mutex<BTreeMap<Vec<u8>, CacheValue>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCollection for MemoryCollection {
    async fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut cache = self.inner.lock().await;
        let entry = cache.get(key)?;
        if entry.is_expired() {
            debug!("Cache entry expired for key: {}", String::from_utf8_lossy(key));
            cache.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) {
        let expires_at = ttl.map(|duration| Instant::now() + duration);
        let mut cache = self.inner.lock().await;
        debug!("Cache PUT for key: {}", String::from_utf8_lossy(key));
        cache.insert(
            key.to_vec(),
            CacheValue {
                value: value.to_vec(),
                expires_at,
            },
        );
    }

    async fn remove(&self, key: &[u8]) {
        self.inner.lock().await.remove(key);
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let cache = self.inner.lock().await;
        cache
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    async fn clear(&self) {
        self.inner.lock().await.clear();
        debug!("Cache CLEAR");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_cache_get_put() {
        let cache = MemoryCollection::new();

        assert!(cache.get(b"key1").await.is_none());
        cache.put(b"key1", b"123", None).await;
        assert_eq!(cache.get(b"key1").await, Some(b"123".to_vec()));
        assert!(cache.get(b"key2").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_ttl_expiration() {
        let cache = MemoryCollection::new();

        cache
            .put(b"key1", b"123", Some(Duration::from_millis(10)))
            .await;
        assert_eq!(cache.get(b"key1").await, Some(b"123".to_vec()));

        sleep(Duration::from_millis(20)).await;
        assert!(cache.get(b"key1").await.is_none());
        assert!(cache.scan_prefix(b"key").await.is_empty());
    }

    #[tokio::test]
    async fn test_cache_scan_prefix_is_ordered() {
        let cache = MemoryCollection::new();
        cache.put(b"f1|2024-01-03", b"b", None).await;
        cache.put(b"f1|2024-01-02", b"a", None).await;
        cache.put(b"f2|2024-01-02", b"c", None).await;

        let keys: Vec<Vec<u8>> = cache
            .scan_prefix(b"f1|")
            .await
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"f1|2024-01-02".to_vec(), b"f1|2024-01-03".to_vec()]);
    }

    #[tokio::test]
    async fn test_cache_remove_and_clear() {
        let cache = MemoryCollection::new();

        cache.put(b"key1", b"1", None).await;
        cache.put(b"key2", b"2", None).await;
        cache.remove(b"key1").await;
        assert!(cache.get(b"key1").await.is_none());

        cache.clear().await;
        assert!(cache.get(b"key2").await.is_none());
    }
}
