//! Redis implementation of the shared store.
//!
//! Regular commands go through a `deadpool-redis` pool. Subscriptions open a
//! dedicated client per call: a connection in subscriber mode must not issue
//! regular commands, so pooled connections are never used for pub/sub.

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{info, warn};

use hivesync_core::config::RedisConfig;

use crate::error::StoreError;
use crate::traits::{MessageStream, SharedStore};

/// Redis-backed shared store.
pub struct RedisStore {
    pool: Pool,
    /// Connection URL, retained for dedicated pub/sub clients.
    url: String,
}

impl RedisStore {
    /// Build a pool from configuration and verify connectivity.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        info!(url = %config.url, "connecting to Redis");

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let pool_config = redis_config.pool.get_or_insert_with(Default::default);
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(Duration::from_millis(config.timeout_ms));
        pool_config.timeouts.create = Some(Duration::from_millis(config.timeout_ms));
        pool_config.timeouts.recycle = Some(Duration::from_millis(config.timeout_ms));

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let store = Self {
            pool,
            url: config.url.clone(),
        };
        store.ping().await?;
        Ok(store)
    }

    /// Health probe.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        // SET key value NX PX ttl — one atomic command, the election arbiter.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        conn.del::<_, u64>(key)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        conn.pexpire::<_, bool>(key, ttl.as_millis() as i64)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        conn.mget::<_, Vec<Option<String>>>(keys)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| StoreError::Publish(e.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        // Dedicated client: subscriber connections must not share the pool.
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| StoreError::Subscribe(e.to_string()))?;

        info!(channel = %channel, "subscribed to Redis channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(error = %e, "failed to decode pub/sub payload");
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
        let mut conn = self.conn().await?;
        conn.hincr::<_, _, _, i64>(key, field, delta)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
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
        let mut conn = self.conn().await?;
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn counter_remove(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        conn.hdel::<_, _, u64>(key, fields.to_vec())
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn counter_get(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn().await?;
        conn.hget::<_, _, Option<i64>>(key, field)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn counter_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<i64>>, StoreError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async::<Vec<Option<i64>>>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }
}
