//! # Cache Key Canonicalizer
//!
//! Deterministically turns a (service, method, structured-inputs) triple
//! into a fixed-width cache key. Object keys are sorted recursively before
//! hashing so that map insertion order never changes the key; array order
//! is preserved because sequence order is semantically significant.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Hex characters of the digest kept in the key. 16 hex chars = 64 bits,
/// enough to make collisions between distinct inputs negligible.
const DIGEST_LEN: usize = 16;

/// Generate the canonical cache key for a calculation call.
///
/// Two calls with structurally equal inputs produce identical keys
/// regardless of map-key insertion order. Timestamps must already be
/// encoded as text (chrono's serde impls emit RFC 3339), so they hash
/// stably.
pub fn canonical_key(service: &str, method: &str, inputs: &Value) -> String {
    let canonical = canonicalize(inputs);
    // serde_json::Map preserves insertion order, so serializing the
    // rebuilt value yields a stable byte sequence.
    let serialized = canonical.to_string();

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{}:{}:{}", service, method, &digest[..DIGEST_LEN])
}

/// Rebuild a JSON value with all object keys in sorted order, recursively.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object_with_order(pairs: &[(&str, Value)]) -> Value {
        let mut map = Map::new();
        for (key, value) in pairs {
            map.insert(key.to_string(), value.clone());
        }
        Value::Object(map)
    }

    #[test]
    fn test_key_has_service_method_prefix_and_fixed_width_digest() {
        let key = canonical_key("FinancialCalculations", "calculateTax", &json!({"rate": 10}));
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts[0], "FinancialCalculations");
        assert_eq!(parts[1], "calculateTax");
        assert_eq!(parts[2].len(), DIGEST_LEN);
    }

    #[test]
    fn test_map_key_order_does_not_change_key() {
        let a = object_with_order(&[
            ("amount", json!(100)),
            ("currency", json!("USD")),
            ("rate", json!(0.1)),
        ]);
        let b = object_with_order(&[
            ("rate", json!(0.1)),
            ("currency", json!("USD")),
            ("amount", json!(100)),
        ]);
        assert_eq!(
            canonical_key("Svc", "method", &a),
            canonical_key("Svc", "method", &b)
        );
    }

    #[test]
    fn test_nested_map_order_does_not_change_key() {
        let a = json!({"outer": {"b": 2, "a": 1}, "list": [1, 2]});
        let b = object_with_order(&[
            ("list", json!([1, 2])),
            ("outer", object_with_order(&[("a", json!(1)), ("b", json!(2))])),
        ]);
        assert_eq!(
            canonical_key("Svc", "m", &a),
            canonical_key("Svc", "m", &b)
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = json!({"quantities": [1, 2, 3]});
        let b = json!({"quantities": [3, 2, 1]});
        assert_ne!(
            canonical_key("Svc", "m", &a),
            canonical_key("Svc", "m", &b)
        );
    }

    #[test]
    fn test_different_inputs_produce_different_keys() {
        let a = json!({"amount": 100, "currency": "USD"});
        let b = json!({"amount": 200, "currency": "USD"});
        assert_ne!(
            canonical_key("Svc", "m", &a),
            canonical_key("Svc", "m", &b)
        );
    }

    #[test]
    fn test_different_methods_produce_different_keys() {
        let inputs = json!({"amount": 100});
        assert_ne!(
            canonical_key("Svc", "calculateTax", &inputs),
            canonical_key("Svc", "calculateDiscount", &inputs)
        );
    }

    #[test]
    fn test_timestamps_canonicalize_as_text() {
        let ts = chrono::DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let a = json!({"asOf": ts});
        let b = json!({"asOf": "2024-06-01T12:00:00Z"});
        assert_eq!(
            canonical_key("Svc", "m", &a),
            canonical_key("Svc", "m", &b)
        );
    }
}
