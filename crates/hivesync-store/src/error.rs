use thiserror::Error;

/// Errors surfaced by shared-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store pool error: {0}")]
    Pool(String),

    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("store subscribe error: {0}")]
    Subscribe(String),

    #[error("store publish error: {0}")]
    Publish(String),
}
