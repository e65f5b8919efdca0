//! The cache coherence engine.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hivesync_core::config::CacheConfig;
use hivesync_core::{TimerService, canonical_param_key, now_unix_ms};
use hivesync_store::{DynSharedStore, StoreError};

use crate::error::CacheError;
use crate::events::CacheEvent;
use crate::metrics;

/// Name of the TTL sweep callback on the shared timer service.
const SWEEP_TIMER: &str = "hivesync_cache_ttl_sweep";

/// An L1 entry. TTL metadata lives inside the entry; the sweep walks the map.
#[derive(Debug, Clone)]
struct LocalEntry {
    value: Value,
    created_at_ms: i64,
    ttl: Option<Duration>,
}

impl LocalEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.ttl
            .is_some_and(|ttl| self.created_at_ms + (ttl.as_millis() as i64) < now_ms)
    }
}

/// Hybrid two-level read-through cache.
///
/// One instance per process, constructed at startup and shared by reference.
/// `start()` arms the TTL sweep and the broadcast subscriber; `stop()` tears
/// both down.
///
/// ## Read paths
///
/// | Path | Hit source   | Fill                                       |
/// |------|--------------|--------------------------------------------|
/// | L1   | local map    | provider → broadcast `L1Update` to all     |
/// | L2   | shared store | provider → `SET` (+ `PEXPIRE` with a TTL)  |
///
/// The L1 fill returns the computed value directly; the originator's local
/// map is populated by its own subscriber receiving the broadcast echo, so
/// the broadcast path is the only write path into L1.
pub struct HybridCache {
    store: DynSharedStore,
    local: DashMap<String, LocalEntry>,
    timers: Arc<TimerService>,
    config: CacheConfig,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl HybridCache {
    pub fn new(store: DynSharedStore, timers: Arc<TimerService>, config: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            local: DashMap::new(),
            timers,
            config,
            listener: Mutex::new(None),
        })
    }

    /// Arm the TTL sweep and spawn the broadcast subscriber. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut slot) = self.listener.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let cache = Arc::clone(self);
        self.timers
            .on_timer(SWEEP_TIMER, self.config.sweep_interval(), move || {
                let cache = Arc::clone(&cache);
                async move {
                    cache.sweep_expired();
                }
            });

        let cache = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { cache.subscribe_loop().await }));
    }

    /// Deregister the sweep and abort the subscriber.
    pub fn stop(&self) {
        self.timers.off_timer(SWEEP_TIMER);
        if let Ok(mut slot) = self.listener.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    /// Read-through against the in-process L1 map.
    ///
    /// On a miss the provider runs, a non-`None` result is broadcast to all
    /// replicas (including this one), and the value is returned directly —
    /// the call never waits for its own broadcast round trip. `None` results
    /// are returned but never cached.
    ///
    /// A broadcast publish failure propagates exactly like a provider
    /// failure: the value was computed, but the call fails.
    pub async fn get_l1<P, T, F, Fut>(
        &self,
        param: &P,
        provider: F,
        ttl: Option<Duration>,
    ) -> Result<Option<T>, CacheError>
    where
        P: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let key = canonical_param_key(param)?;

        let hit = self
            .local
            .get(&key)
            .map(|e| (!e.is_expired(now_unix_ms())).then(|| e.value.clone()));
        match hit {
            Some(Some(value)) => {
                debug!(key = %key, "cache hit (L1)");
                metrics::record_cache_hit("L1");
                return Ok(Some(serde_json::from_value(value)?));
            }
            Some(None) => {
                self.local.remove_if(&key, |_, e| e.is_expired(now_unix_ms()));
            }
            None => {}
        }
        debug!(key = %key, "cache miss (L1)");
        metrics::record_cache_miss();

        let computed = provider().await.map_err(CacheError::Provider)?;
        let Some(value) = computed else {
            return Ok(None);
        };

        let event = CacheEvent::L1Update {
            key,
            value: serde_json::to_value(&value)?,
            created_at_ms: now_unix_ms(),
            ttl_seconds: ttl.map(|t| t.as_secs()),
        };
        self.store
            .publish(&self.config.channel, &serde_json::to_string(&event)?)
            .await?;

        Ok(Some(value))
    }

    /// Read-through against the shared store (L2).
    ///
    /// No broadcast: the store itself is the shared state. TTLs use the
    /// store's native expiry.
    pub async fn get_l2<P, T, F, Fut>(
        &self,
        param: &P,
        provider: F,
        ttl: Option<Duration>,
    ) -> Result<Option<T>, CacheError>
    where
        P: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let key = self.l2_key(&canonical_param_key(param)?);

        if let Some(raw) = self.store.get(&key).await? {
            debug!(key = %key, "cache hit (L2)");
            metrics::record_cache_hit("L2");
            return Ok(Some(serde_json::from_str(&raw)?));
        }
        debug!(key = %key, "cache miss (L2)");
        metrics::record_cache_miss();

        let computed = provider().await.map_err(CacheError::Provider)?;
        let Some(value) = computed else {
            return Ok(None);
        };

        let raw = serde_json::to_string(&value)?;
        self.store.set(&key, &raw).await?;
        if let Some(ttl) = ttl {
            self.store.expire(&key, ttl).await?;
        }

        Ok(Some(value))
    }

    /// Broadcast a reset for the key derived from `param`.
    ///
    /// All deletion happens on receipt: every replica (this one included)
    /// drops its L1 entry and deletes the namespaced L2 key.
    pub async fn reset<P>(&self, param: &P) -> Result<(), CacheError>
    where
        P: Serialize + ?Sized,
    {
        let key = canonical_param_key(param)?;
        let event = CacheEvent::Reset { key };
        self.store
            .publish(&self.config.channel, &serde_json::to_string(&event)?)
            .await?;
        Ok(())
    }

    // ==================== Manual cache operations (L2 only) ====================

    /// Unconditionally overwrite an L2 entry.
    pub async fn create_cache(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        let namespaced = self.l2_key(key);
        self.store.set(&namespaced, &value.to_string()).await?;
        Ok(())
    }

    /// Read-modify-write an L2 entry.
    ///
    /// Reads the current value (`None` when absent), applies `updater`, and
    /// writes the result back when it is `Some`. This is a plain read then
    /// write, not a compare-and-swap: concurrent updaters can race and the
    /// last write wins.
    pub async fn update_cache<F>(&self, key: &str, updater: F) -> Result<Option<Value>, CacheError>
    where
        F: FnOnce(Option<Value>) -> Option<Value>,
    {
        let namespaced = self.l2_key(key);
        let current = match self.store.get(&namespaced).await? {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };

        match updater(current) {
            Some(next) => {
                self.store.set(&namespaced, &next.to_string()).await?;
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    /// Delete an L2 entry. Returns the number of keys removed.
    pub async fn remove_cache(&self, key: &str) -> Result<u64, CacheError> {
        Ok(self.store.delete(&self.l2_key(key)).await?)
    }

    /// Read an L2 entry.
    pub async fn get_cache(&self, key: &str) -> Result<Option<Value>, CacheError> {
        match self.store.get(&self.l2_key(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Batched L2 read, one store round trip, ordered like `keys`.
    pub async fn get_caches(&self, keys: &[String]) -> Result<Vec<Option<Value>>, CacheError> {
        let namespaced: Vec<String> = keys.iter().map(|k| self.l2_key(k)).collect();
        self.store
            .get_many(&namespaced)
            .await?
            .into_iter()
            .map(|raw| match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            })
            .collect()
    }

    /// Remove every L1 entry whose TTL has lapsed.
    ///
    /// Runs on the sweep timer; public so tests (and operators) can trigger
    /// a sweep directly.
    pub fn sweep_expired(&self) {
        let now = now_unix_ms();
        self.local.retain(|_, entry| !entry.is_expired(now));
        metrics::record_l1_entries(self.local.len());
    }

    /// Number of live L1 entries (expired-but-unswept entries included).
    pub fn l1_len(&self) -> usize {
        self.local.len()
    }

    fn l2_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    async fn subscribe_loop(self: Arc<Self>) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(300);

        loop {
            match self.run_subscriber().await {
                Ok(()) => {
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "cache event listener error, reconnecting"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn run_subscriber(&self) -> Result<(), StoreError> {
        let mut stream = self.store.subscribe(&self.config.channel).await?;
        info!(channel = %self.config.channel, "subscribed to cache event channel");

        while let Some(payload) = stream.next().await {
            match serde_json::from_str::<CacheEvent>(&payload) {
                Ok(event) => self.apply_event(event).await,
                Err(e) => {
                    warn!(error = %e, payload = %payload, "failed to decode cache event");
                }
            }
        }

        Err(StoreError::Subscribe("cache event stream ended".into()))
    }

    /// Apply one broadcast event to this replica.
    ///
    /// Failures here are logged and skipped; the subscriber loop must survive
    /// malformed or failing events.
    async fn apply_event(&self, event: CacheEvent) {
        match event {
            CacheEvent::L1Update {
                key,
                value,
                created_at_ms,
                ttl_seconds,
            } => {
                debug!(key = %key, "applying L1 update");
                self.local.insert(
                    key,
                    LocalEntry {
                        value,
                        created_at_ms,
                        ttl: ttl_seconds.map(Duration::from_secs),
                    },
                );
                metrics::record_l1_entries(self.local.len());
            }
            CacheEvent::Reset { key } => {
                debug!(key = %key, "applying reset");
                self.local.remove(&key);
                let namespaced = self.l2_key(&key);
                if let Err(e) = self.store.delete(&namespaced).await {
                    warn!(key = %key, error = %e, "failed to delete L2 entry on reset");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hivesync_store::{MemoryStore, MessageStream, SharedStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine(store: DynSharedStore) -> Arc<HybridCache> {
        let cache = HybridCache::new(
            store,
            Arc::new(TimerService::new()),
            CacheConfig::default(),
        );
        cache.start();
        cache
    }

    /// Let spawned subscribers and in-flight broadcasts drain.
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_l1_read_through_invokes_provider_once() {
        let store = Arc::new(MemoryStore::new());
        let cache = engine(store);
        settle().await;

        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        let first: Option<String> = cache
            .get_l1(&json!({"id": "u1"}), || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Some("ada".to_string()))
            }, None)
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("ada"));
        settle().await;

        let c = Arc::clone(&calls);
        let second: Option<String> = cache
            .get_l1(&json!({"id": "u1"}), || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Some("stale".to_string()))
            }, None)
            .await
            .unwrap();
        assert_eq!(second.as_deref(), Some("ada"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_l1_key_is_canonical_across_field_order() {
        let store = Arc::new(MemoryStore::new());
        let cache = engine(store);
        settle().await;

        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        let _: Option<u32> = cache
            .get_l1(&json!({"a": 1, "b": 2}), || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Some(7))
            }, None)
            .await
            .unwrap();
        settle().await;

        let c = Arc::clone(&calls);
        let hit: Option<u32> = cache
            .get_l1(&json!({"b": 2, "a": 1}), || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Some(8))
            }, None)
            .await
            .unwrap();
        assert_eq!(hit, Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_l1_none_results_are_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let cache = engine(store);
        settle().await;

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let c = Arc::clone(&calls);
            let miss: Option<String> = cache
                .get_l1(&"absent", || async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }, None)
                .await
                .unwrap();
            assert_eq!(miss, None);
            settle().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.l1_len(), 0);
    }

    #[tokio::test]
    async fn test_l1_provider_error_propagates() {
        let store = Arc::new(MemoryStore::new());
        let cache = engine(store);
        settle().await;

        let result: Result<Option<String>, _> = cache
            .get_l1(&"boom", || async { Err(anyhow::anyhow!("db down")) }, None)
            .await;
        match result {
            Err(CacheError::Provider(e)) => assert_eq!(e.to_string(), "db down"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(cache.l1_len(), 0);
    }

    #[tokio::test]
    async fn test_l2_read_through_and_native_ttl() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let cache = engine(Arc::clone(&store) as DynSharedStore);
        settle().await;

        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        let first: Option<String> = cache
            .get_l2(&"profile", || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Some("v1".to_string()))
            }, Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("v1"));

        // The value lives in the shared store under the namespaced key.
        let raw = store.get("hivesync:cache:\"profile\"").await.unwrap();
        assert_eq!(raw.as_deref(), Some("\"v1\""));

        let c = Arc::clone(&calls);
        let second: Option<String> = cache
            .get_l2(&"profile", || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Some("v2".to_string()))
            }, None)
            .await
            .unwrap();
        assert_eq!(second.as_deref(), Some("v1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // L2 never touches the local map.
        assert_eq!(cache.l1_len(), 0);
    }

    #[tokio::test]
    async fn test_ttl_sweep_removes_lapsed_entries() {
        let store = Arc::new(MemoryStore::new());
        let cache = engine(store);
        settle().await;

        // Fresh entry with a 1s TTL is present immediately.
        cache
            .apply_event(CacheEvent::L1Update {
                key: "\"session\"".into(),
                value: json!("live"),
                created_at_ms: now_unix_ms(),
                ttl_seconds: Some(1),
            })
            .await;
        cache.sweep_expired();
        assert_eq!(cache.l1_len(), 1);

        // Backdate the entry past its TTL; the next sweep removes it.
        cache
            .apply_event(CacheEvent::L1Update {
                key: "\"session\"".into(),
                value: json!("live"),
                created_at_ms: now_unix_ms() - 2_000,
                ttl_seconds: Some(1),
            })
            .await;
        cache.sweep_expired();
        assert_eq!(cache.l1_len(), 0);

        // Entries without a TTL are never swept.
        cache
            .apply_event(CacheEvent::L1Update {
                key: "\"pinned\"".into(),
                value: json!("keep"),
                created_at_ms: now_unix_ms() - 3_600_000,
                ttl_seconds: None,
            })
            .await;
        cache.sweep_expired();
        assert_eq!(cache.l1_len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_before_sweep() {
        let store = Arc::new(MemoryStore::new());
        let cache = engine(store);
        settle().await;

        cache
            .apply_event(CacheEvent::L1Update {
                key: canonical_param_key(&"user").unwrap(),
                value: json!("old"),
                created_at_ms: now_unix_ms() - 10_000,
                ttl_seconds: Some(1),
            })
            .await;

        let fresh: Option<String> = cache
            .get_l1(&"user", || async { Ok(Some("new".to_string())) }, None)
            .await
            .unwrap();
        assert_eq!(fresh.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_manual_cache_operations() {
        let store = Arc::new(MemoryStore::new());
        let cache = engine(store);
        settle().await;

        cache.create_cache("counters", &json!({"n": 1})).await.unwrap();
        assert_eq!(
            cache.get_cache("counters").await.unwrap(),
            Some(json!({"n": 1}))
        );

        let updated = cache
            .update_cache("counters", |current| {
                let n = current
                    .as_ref()
                    .and_then(|v| v["n"].as_i64())
                    .unwrap_or_default();
                Some(json!({"n": n + 1}))
            })
            .await
            .unwrap();
        assert_eq!(updated, Some(json!({"n": 2})));

        // An updater returning None leaves the entry untouched.
        let skipped = cache.update_cache("counters", |_| None).await.unwrap();
        assert_eq!(skipped, None);
        assert_eq!(
            cache.get_cache("counters").await.unwrap(),
            Some(json!({"n": 2}))
        );

        cache.create_cache("other", &json!("x")).await.unwrap();
        let values = cache
            .get_caches(&["counters".into(), "missing".into(), "other".into()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(json!({"n": 2})), None, Some(json!("x"))]);

        assert_eq!(cache.remove_cache("counters").await.unwrap(), 1);
        assert_eq!(cache.get_cache("counters").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_broadcast_does_not_kill_subscriber() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let cache = engine(Arc::clone(&store) as DynSharedStore);
        settle().await;

        let channel = CacheConfig::default().channel;
        store.publish(&channel, "not json at all").await.unwrap();
        store
            .publish(&channel, r#"{"event":"unknown_kind","key":"k"}"#)
            .await
            .unwrap();
        settle().await;

        // A valid event afterwards still lands.
        let event = CacheEvent::L1Update {
            key: "\"k\"".into(),
            value: json!(1),
            created_at_ms: now_unix_ms(),
            ttl_seconds: None,
        };
        store
            .publish(&channel, &serde_json::to_string(&event).unwrap())
            .await
            .unwrap();
        settle().await;

        assert_eq!(cache.l1_len(), 1);
    }

    /// Delegates everything to an inner store but fails every publish.
    struct PublishFails(MemoryStore);

    #[async_trait]
    impl SharedStore for PublishFails {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.0.set(key, value).await
        }
        async fn set_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> Result<bool, StoreError> {
            self.0.set_if_absent(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<u64, StoreError> {
            self.0.delete(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.0.expire(key, ttl).await
        }
        async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
            self.0.get_many(keys).await
        }
        async fn publish(&self, _channel: &str, _payload: &str) -> Result<(), StoreError> {
            Err(StoreError::Publish("broker unreachable".into()))
        }
        async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
            self.0.subscribe(channel).await
        }
        async fn counter_increment(
            &self,
            key: &str,
            field: &str,
            delta: i64,
        ) -> Result<i64, StoreError> {
            self.0.counter_increment(key, field, delta).await
        }
        async fn counter_decrement(
            &self,
            key: &str,
            field: &str,
            delta: i64,
        ) -> Result<i64, StoreError> {
            self.0.counter_decrement(key, field, delta).await
        }
        async fn counter_set(&self, key: &str, field: &str, value: i64) -> Result<(), StoreError> {
            self.0.counter_set(key, field, value).await
        }
        async fn counter_remove(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
            self.0.counter_remove(key, fields).await
        }
        async fn counter_get(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
            self.0.counter_get(key, field).await
        }
        async fn counter_get_many(
            &self,
            key: &str,
            fields: &[String],
        ) -> Result<Vec<Option<i64>>, StoreError> {
            self.0.counter_get_many(key, fields).await
        }
    }

    #[tokio::test]
    async fn test_publish_failure_fails_the_l1_fill() {
        let store = Arc::new(PublishFails(MemoryStore::new()));
        let cache = engine(store);
        settle().await;

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let result: Result<Option<String>, _> = cache
            .get_l1(&"k", || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Some("computed".to_string()))
            }, None)
            .await;

        // The provider ran, but the broadcast failure fails the call and
        // nothing is cached.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CacheError::Store(_))));
        assert_eq!(cache.l1_len(), 0);
    }

    #[tokio::test]
    async fn test_stop_tears_down_sweep_and_listener() {
        let store = Arc::new(MemoryStore::new());
        let timers = Arc::new(TimerService::new());
        let cache = HybridCache::new(store, Arc::clone(&timers), CacheConfig::default());
        cache.start();
        settle().await;
        assert_eq!(timers.interval_count(), 1);

        cache.stop();
        assert_eq!(timers.interval_count(), 0);
    }
}
