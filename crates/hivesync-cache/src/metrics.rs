//! Cache metrics through the `metrics` facade.
//!
//! The crates only record; installing an exporter is the embedding
//! application's concern.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "hivesync_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "hivesync_cache_misses_total";
    pub const CACHE_L1_ENTRIES: &str = "hivesync_cache_l1_entries";
}

/// Record a cache hit for a tier ("L1" or "L2").
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record the current number of L1 entries.
pub fn record_l1_entries(entries: usize) {
    gauge!(names::CACHE_L1_ENTRIES).set(entries as f64);
}
