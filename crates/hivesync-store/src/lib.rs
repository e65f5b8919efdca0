//! # hivesync-store
//!
//! Shared-store abstraction for the hivesync subsystem.
//!
//! This crate defines the [`SharedStore`] trait — uniform async access to the
//! key-value/pub-sub transport the cache coherence engine and the leader
//! election lock are built on — plus two implementations:
//!
//! - [`RedisStore`]: the production backend over a `deadpool-redis` pool.
//!   Pub/sub subscriptions open a dedicated client, because a subscribed
//!   connection must not issue regular commands.
//! - [`MemoryStore`]: an in-process backend for single-instance deployments
//!   and tests. Multi-replica tests share one `MemoryStore` as their broker.
//!
//! Failures surface as [`StoreError`]; nothing is retried internally. Retry
//! policy belongs to callers.
//!
//! ## Example
//!
//! ```ignore
//! use hivesync_store::{DynSharedStore, MemoryStore, SharedStore};
//!
//! let store: DynSharedStore = std::sync::Arc::new(MemoryStore::new());
//! store.set("greeting", "hello").await?;
//! assert_eq!(store.get("greeting").await?.as_deref(), Some("hello"));
//! ```

mod error;
mod memory;
mod redis_store;
mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use traits::{MessageStream, SharedStore};

/// Type alias for a store result.
pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for a shareable store trait object.
pub type DynSharedStore = std::sync::Arc<dyn SharedStore>;
