//! In-memory implementation of the shared store.
//!
//! Serves single-instance deployments (no Redis) and every multi-replica
//! test, where one `MemoryStore` instance plays the role of the shared
//! broker. TTLs are checked lazily on access, with `tokio::time::Instant`
//! so paused-clock tests can drive expiry deterministically.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::error::StoreError;
use crate::traits::{MessageStream, SharedStore};

/// Buffer size for per-channel broadcast fan-out.
const CHANNEL_CAPACITY: usize = 1024;

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn live(value: String) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn with_ttl(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process shared store.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    counters: DashMap<String, DashMap<String, i64>>,
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let hit = self
            .entries
            .get(key)
            .map(|e| (!e.is_expired()).then(|| e.value.clone()));
        match hit {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, v| v.is_expired());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        // Like Redis SET, an unconditional write clears any TTL.
        self.entries
            .insert(key.to_string(), StoredValue::live(value.to_string()));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::with_ttl(value.to_string(), ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::with_ttl(value.to_string(), ttl));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        match self.entries.remove(key) {
            Some((_, v)) if !v.is_expired() => Ok(1),
            _ => Ok(0),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        if let Some(sender) = self.channels.get(channel) {
            // A send error only means no live subscribers.
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
            match item {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(error = %e, "memory pub/sub subscriber lagged");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn counter_increment(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let bucket = self
            .counters
            .entry(key.to_string())
            .or_insert_with(DashMap::new);
        let mut value = bucket.entry(field.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn counter_decrement(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        self.counter_increment(key, field, -delta).await
    }

    async fn counter_set(&self, key: &str, field: &str, value: i64) -> Result<(), StoreError> {
        self.counters
            .entry(key.to_string())
            .or_insert_with(DashMap::new)
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn counter_remove(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        let Some(bucket) = self.counters.get(key) else {
            return Ok(0);
        };
        let removed = fields
            .iter()
            .filter(|field| bucket.remove(field.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn counter_get(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .counters
            .get(key)
            .and_then(|bucket| bucket.get(field).map(|v| *v)))
    }

    async fn counter_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<i64>>, StoreError> {
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(self.counter_get(key, field).await?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_set_delete_roundtrip() {
        let store = MemoryStore::new();

        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));

        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        assert_eq!(store.delete("k").await.unwrap(), 1);
        assert_eq!(store.delete("k").await.unwrap(), 0);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_is_exclusive_until_expiry() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(100);

        assert!(store.set_if_absent("lock", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));

        // After natural expiry the key is up for grabs again.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.get("lock").await.unwrap(), None);
        assert!(store.set_if_absent("lock", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_extends_and_reports_missing() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();

        assert!(store.expire("k", Duration::from_millis(50)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.expire("k", Duration::from_millis(50)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Still alive: the second expire pushed the deadline out.
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.expire("k", Duration::from_millis(50)).await.unwrap());
        assert!(!store.expire("missing", Duration::from_millis(50)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_clears_ttl() {
        let store = MemoryStore::new();
        assert!(
            store
                .set_if_absent("k", "v", Duration::from_millis(50))
                .await
                .unwrap()
        );
        store.set("k", "v2").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_get_many_preserves_order() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();
        store.set("c", "3").await.unwrap();

        let values = store
            .get_many(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![Some("1".to_string()), None, Some("3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let store = MemoryStore::new();
        let mut sub1 = store.subscribe("events").await.unwrap();
        let mut sub2 = store.subscribe("events").await.unwrap();

        store.publish("events", "hello").await.unwrap();

        assert_eq!(sub1.next().await.as_deref(), Some("hello"));
        assert_eq!(sub2.next().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let store = MemoryStore::new();
        store.publish("nobody", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_counter_operations() {
        let store = MemoryStore::new();

        assert_eq!(store.counter_increment("c", "hits", 3).await.unwrap(), 3);
        assert_eq!(store.counter_increment("c", "hits", 2).await.unwrap(), 5);
        assert_eq!(store.counter_decrement("c", "hits", 1).await.unwrap(), 4);

        store.counter_set("c", "misses", 7).await.unwrap();
        assert_eq!(store.counter_get("c", "misses").await.unwrap(), Some(7));
        assert_eq!(store.counter_get("c", "unknown").await.unwrap(), None);

        let values = store
            .counter_get_many("c", &["hits".into(), "unknown".into(), "misses".into()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(4), None, Some(7)]);

        let removed = store
            .counter_remove("c", &["hits".into(), "unknown".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.counter_get("c", "hits").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_counter_updates_lose_nothing() {
        let store = Arc::new(MemoryStore::new());
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.counter_increment("c", "net", 1).await.unwrap();
                }
            }));
        }
        for _ in 0..4 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.counter_decrement("c", "net", 2).await.unwrap();
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        // 8 * 100 - 4 * 50 * 2 = 400; every update maps to one atomic op.
        assert_eq!(store.counter_get("c", "net").await.unwrap(), Some(400));
    }
}
