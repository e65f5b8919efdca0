//! The shared-store contract.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::time::Duration;

use crate::error::StoreError;

/// Stream of raw pub/sub payloads for one channel subscription.
pub type MessageStream = BoxStream<'static, String>;

/// Uniform async access to the shared key-value/pub-sub transport.
///
/// Implementations must be thread-safe (`Send + Sync`). Operations map to
/// single store commands; none of them retries internally, and every counter
/// operation is atomic on the store side.
#[async_trait]
pub trait SharedStore: Send + Sync {
    // ==================== Key-value ====================

    /// Read a key. Returns `None` for missing (or expired) keys.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a key unconditionally, clearing any TTL it had.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Atomic conditional set: write `value` with the given TTL only if the
    /// key is absent. Returns `true` when the write won.
    ///
    /// This is the sole arbiter the leader election lock builds on.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete a key. Returns the number of keys removed (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Set a key's TTL. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Batched read, one round trip. The result is ordered like `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    // ==================== Pub/sub ====================

    /// Publish a payload to a channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;

    /// Subscribe to a channel on a dedicated connection.
    ///
    /// The stream ends when the underlying connection drops; callers that
    /// need a durable subscription resubscribe in their own loop.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError>;

    // ==================== Hash counters ====================

    /// Atomically add `delta` to a hash counter field, returning the new value.
    async fn counter_increment(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError>;

    /// Atomically subtract `delta` from a hash counter field, returning the
    /// new value.
    async fn counter_decrement(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError>;

    /// Overwrite a hash counter field.
    async fn counter_set(&self, key: &str, field: &str, value: i64) -> Result<(), StoreError>;

    /// Remove hash counter fields. Returns the number of fields removed.
    async fn counter_remove(&self, key: &str, fields: &[String]) -> Result<u64, StoreError>;

    /// Read one hash counter field.
    async fn counter_get(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError>;

    /// Read several hash counter fields, ordered like `fields`.
    async fn counter_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<i64>>, StoreError>;
}
