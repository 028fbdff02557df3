use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A named, byte-oriented key-value collection with optional per-entry TTL.
#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>);
    async fn remove(&self, key: &[u8]);
    /// Live entries whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
    async fn clear(&self);
}

pub trait Store: Send + Sync {
    fn get_collection(
        &self,
        name: &str,
        persist: bool,
        create_if_missing: bool,
    ) -> Option<Arc<dyn KeyValueCollection>>;
    fn remove_collection(&self, name: &str) -> bool;
}

pub async fn get_json<T: DeserializeOwned>(
    collection: &dyn KeyValueCollection,
    key: &str,
) -> Option<T> {
    let raw = collection.get(key.as_bytes()).await?;
    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Discarding undecodable entry {key}: {e}");
            None
        }
    }
}

pub async fn put_json<T: Serialize>(
    collection: &dyn KeyValueCollection,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> anyhow::Result<()> {
    let raw = serde_json::to_vec(value)?;
    collection.put(key.as_bytes(), &raw, ttl).await;
    Ok(())
}

/// Decodes every entry under `prefix`, skipping ones that fail to parse.
pub async fn scan_json<T: DeserializeOwned>(
    collection: &dyn KeyValueCollection,
    prefix: &str,
) -> Vec<(String, T)> {
    collection
        .scan_prefix(prefix.as_bytes())
        .await
        .into_iter()
        .filter_map(|(key, raw)| {
            let key = String::from_utf8(key).ok()?;
            match serde_json::from_slice(&raw) {
                Ok(value) => Some((key, value)),
                Err(e) => {
                    debug!("Discarding undecodable entry {key}: {e}");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        value: f64,
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let collection = MemoryCollection::new();
        assert!(get_json::<Point>(&collection, "a").await.is_none());

        put_json(&collection, "a|1", &Point { value: 1.5 }, None)
            .await
            .unwrap();
        put_json(&collection, "a|2", &Point { value: 2.5 }, None)
            .await
            .unwrap();
        put_json(&collection, "b|1", &Point { value: 9.0 }, None)
            .await
            .unwrap();
        collection.put(b"a|3", b"not json", None).await;

        assert_eq!(
            get_json::<Point>(&collection, "a|1").await,
            Some(Point { value: 1.5 })
        );
        let scanned: Vec<(String, Point)> = scan_json(&collection, "a|").await;
        assert_eq!(
            scanned,
            vec![
                ("a|1".to_string(), Point { value: 1.5 }),
                ("a|2".to_string(), Point { value: 2.5 }),
            ]
        );
    }
}
