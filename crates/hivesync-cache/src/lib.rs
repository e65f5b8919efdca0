//! # hivesync-cache
//!
//! Hybrid two-level read-through cache with cross-process L1 synchronization.
//!
//! Every process replica owns an L1 map in process memory; the shared store
//! is the L2 tier. L1 fills are broadcast as [`CacheEvent`]s over one fixed
//! pub/sub channel and applied by every replica's subscriber — including the
//! originator, so the broadcast path is the single write path into L1.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐     ┌────────────────────┐
//! │     Replica 1      │     │     Replica 2      │
//! │                    │     │                    │
//! │  HybridCache (L1)  │     │  HybridCache (L1)  │
//! │        │           │     │        ▲           │
//! │        ▼           │     │        │           │
//! │  publish L1Update ─┼────►│  subscriber ───────┘
//! │                    │     │                    │
//! └────────────────────┘     └────────────────────┘
//!              │                      ▲
//!              └──► shared store ─────┘
//!                 (L2 + pub/sub)
//! ```
//!
//! Reads never wait for the broadcast round trip: an L1 miss invokes the
//! caller-supplied provider, broadcasts the result, and returns it directly.

mod cached;
mod engine;
mod error;
mod events;
pub mod metrics;

pub use cached::{CacheLevel, CachedCall, TtlSource};
pub use engine::HybridCache;
pub use error::CacheError;
pub use events::CacheEvent;
