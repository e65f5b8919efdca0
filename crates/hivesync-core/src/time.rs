//! Wall-clock helpers.
//!
//! Cache entry timestamps travel over the broadcast channel between replicas,
//! so they must be wall-clock based (unix milliseconds), not process-local
//! monotonic instants.

use time::OffsetDateTime;

/// Current UTC time.
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Current unix timestamp in milliseconds.
pub fn now_unix_ms() -> i64 {
    let now = OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}
