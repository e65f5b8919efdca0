use thiserror::Error;

use hivesync_core::CoreError;
use hivesync_store::StoreError;

/// Errors surfaced by cache operations.
///
/// Provider failures and broadcast publish failures both propagate to the
/// caller of the getter; nothing on the read-through path is retried.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key error: {0}")]
    Key(#[from] CoreError),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache provider error: {0}")]
    Provider(anyhow::Error),
}
