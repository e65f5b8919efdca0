//! Core primitives shared by every hivesync crate.
//!
//! This crate carries no I/O of its own. It provides:
//! - [`CoreError`], the shared error type for key derivation and configuration
//! - canonical cache-key derivation ([`canonical_param_key`])
//! - wall-clock helpers ([`now_utc`], [`now_unix_ms`])
//! - [`TimerService`], the process-wide repeating-timer multiplexer
//! - configuration sections ([`HivesyncConfig`] and friends)

pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod time;
pub mod timer;

pub use config::{CacheConfig, ElectionConfig, HivesyncConfig, LoggingConfig, RedisConfig};
pub use error::{CoreError, Result};
pub use keys::canonical_param_key;
pub use logging::init_tracing;
pub use time::{now_unix_ms, now_utc};
pub use timer::{TimerCallback, TimerService};
