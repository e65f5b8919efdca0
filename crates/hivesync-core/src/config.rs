//! Configuration sections for the hivesync subsystem.
//!
//! Every section derives serde with per-field defaults so a partial config
//! file (or none at all) yields a working configuration. `HivesyncConfig::load`
//! layers an optional TOML file under `HIVESYNC`-prefixed environment
//! overrides, e.g. `HIVESYNC_REDIS__URL=redis://cache:6379`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HivesyncConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub election: ElectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HivesyncConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("HIVESYNC").separator("__"));

        let loaded: Self = builder
            .build()
            .map_err(|e| CoreError::configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CoreError::configuration(e.to_string()))?;

        loaded.validate().map_err(CoreError::Configuration)?;
        Ok(loaded)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        // Redis validations
        if self.redis.url.is_empty() {
            return Err("redis.url must not be empty".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.redis.timeout_ms == 0 {
            return Err("redis.timeout_ms must be > 0".into());
        }
        // Cache validations
        if self.cache.key_prefix.is_empty() {
            return Err("cache.key_prefix must not be empty".into());
        }
        if self.cache.channel.is_empty() {
            return Err("cache.channel must not be empty".into());
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".into());
        }
        // Election validations
        if self.election.app_name.is_empty() {
            return Err("election.app_name must not be empty".into());
        }
        if self.election.key_prefix.is_empty() {
            return Err("election.key_prefix must not be empty".into());
        }
        if self.election.ttl_ms < 2 {
            return Err("election.ttl_ms must be >= 2 (renewal runs at ttl/2)".into());
        }
        if self.election.wait_ms == 0 {
            return Err("election.wait_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Shared-store (Redis) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis. When disabled the composition root should wire the
    /// in-memory store instead (single-instance deployments).
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Cache coherence engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace prefix applied to every L2 key.
    #[serde(default = "default_cache_key_prefix")]
    pub key_prefix: String,

    /// Pub/sub channel carrying cache coherence events.
    #[serde(default = "default_cache_channel")]
    pub channel: String,

    /// Cadence of the L1 TTL sweep, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_cache_key_prefix() -> String {
    "hivesync:cache".to_string()
}

fn default_cache_channel() -> String {
    "hivesync:cache:events".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    1
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_cache_key_prefix(),
            channel: default_cache_channel(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Leader election configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Application name, part of the derived lock key.
    #[serde(default = "default_election_app_name")]
    pub app_name: String,

    /// Namespace prefix for lock keys.
    #[serde(default = "default_election_key_prefix")]
    pub key_prefix: String,

    /// Lock TTL in milliseconds; the holder renews at ttl/2.
    #[serde(default = "default_election_ttl_ms")]
    pub ttl_ms: u64,

    /// Fixed retry delay for candidates, in milliseconds.
    #[serde(default = "default_election_wait_ms")]
    pub wait_ms: u64,
}

fn default_election_app_name() -> String {
    "hivesync".to_string()
}

fn default_election_key_prefix() -> String {
    "hivesync:leader".to_string()
}

fn default_election_ttl_ms() -> u64 {
    10_000
}

fn default_election_wait_ms() -> u64 {
    1_000
}

impl ElectionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            app_name: default_election_app_name(),
            key_prefix: default_election_key_prefix(),
            ttl_ms: default_election_ttl_ms(),
            wait_ms: default_election_wait_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter when RUST_LOG is not set.
    #[serde(default = "default_logging_level")]
    pub level: String,
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_logging_level(),
        }
    }
}
