//! Canonical cache-key derivation.
//!
//! Cache keys are derived by serializing the caller-supplied parameter value
//! to JSON. Object keys are written in sorted order at every nesting level, so
//! structurally equal parameters always map to the same key regardless of
//! field declaration order. Arrays stay order-sensitive: `[1, 2]` and `[2, 1]`
//! are distinct keys.
//!
//! Sorting is done explicitly here instead of leaning on `serde_json`'s map
//! representation, which changes with the `preserve_order` feature.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Derive the canonical cache key for a parameter value.
///
/// # Errors
///
/// Returns [`CoreError::JsonError`](crate::CoreError::JsonError) when the
/// parameter is not JSON-serializable (e.g. a map with non-string keys).
pub fn canonical_param_key<P: Serialize + ?Sized>(param: &P) -> Result<String> {
    let value = serde_json::to_value(param)?;
    let mut out = String::new();
    write_canonical(&value, &mut out);
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value::String renders with full JSON escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
