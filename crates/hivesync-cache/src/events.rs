//! Cache coherence wire events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event broadcast over the fixed cache channel, JSON-encoded.
///
/// Events are transient: they are applied on receipt and never persisted.
/// Delivery is at-most-once per subscriber — a replica that misses an event
/// self-heals on its next miss or TTL expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A replica resolved an L1 miss; every replica (originator included)
    /// applies the value to its local map.
    L1Update {
        key: String,
        value: Value,
        created_at_ms: i64,
        ttl_seconds: Option<u64>,
    },
    /// Drop the key from every replica's L1 map and delete the namespaced
    /// L2 entry.
    Reset { key: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_l1_update_roundtrip() {
        let event = CacheEvent::L1Update {
            key: r#"{"id":"u1"}"#.to_string(),
            value: json!({"name": "Ada"}),
            created_at_ms: 1_700_000_000_000,
            ttl_seconds: Some(5),
        };

        let wire = serde_json::to_string(&event).unwrap();
        assert!(wire.contains(r#""event":"l1_update""#));

        let parsed: CacheEvent = serde_json::from_str(&wire).unwrap();
        match parsed {
            CacheEvent::L1Update {
                key,
                value,
                created_at_ms,
                ttl_seconds,
            } => {
                assert_eq!(key, r#"{"id":"u1"}"#);
                assert_eq!(value, json!({"name": "Ada"}));
                assert_eq!(created_at_ms, 1_700_000_000_000);
                assert_eq!(ttl_seconds, Some(5));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_reset_wire_format() {
        let event = CacheEvent::Reset {
            key: "user".to_string(),
        };
        let wire = serde_json::to_string(&event).unwrap();
        assert_eq!(wire, r#"{"event":"reset","key":"user"}"#);
    }
}
