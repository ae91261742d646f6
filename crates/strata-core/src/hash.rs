//! Canonical hashing and content addressing.
//!
//! Every object id in Strata is the SHA-256 of a canonical serialization of
//! its payload. The canonical form is key-order independent:
//!
//! - `null`, booleans and numbers serialize as their literal JSON text
//! - strings serialize JSON-escaped with quotes
//! - arrays serialize element by element, order preserved
//! - objects serialize with keys sorted lexicographically
//! - no whitespace anywhere
//!
//! Two payloads that differ only in key insertion order therefore hash
//! identically.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of a full content address in hex characters (256 bits).
pub const CONTENT_ID_LEN: usize = 64;

/// Length of a display-only short id.
pub const SHORT_ID_LEN: usize = 8;

/// Serialize a JSON value canonically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
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
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

/// Hash a JSON value into a 64-character hex content address.
pub fn hash_value(value: &Value) -> String {
    hash_bytes(canonical_json(value).as_bytes())
}

/// Hash raw bytes into a 64-character hex content address.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Display prefix of a content address.
///
/// Not unique; never use it as a storage key.
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// Whether a string looks like a full content address.
pub fn is_content_id(id: &str) -> bool {
    id.len() == CONTENT_ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Truncate a timestamp to millisecond precision.
///
/// Object timestamps are stored in milliseconds, so anything finer would make
/// a stored object hash differently from the one that was inserted.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Current time at millisecond precision.
pub fn now_millis() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

/// Canonical text form of an object timestamp.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Content address of an object: the hash of `{type, content, createdAt}`.
pub fn object_id(object_type: &str, content: &Value, created_at: DateTime<Utc>) -> String {
    let mut doc = serde_json::Map::new();
    doc.insert("content".to_string(), content.clone());
    doc.insert(
        "createdAt".to_string(),
        Value::String(format_timestamp(created_at)),
    );
    doc.insert("type".to_string(), Value::String(object_type.to_string()));
    hash_value(&Value::Object(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys_without_whitespace() {
        let value = json!({"b": 1, "a": {"d": [3, 2], "c": null}, "s": "x\"y"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":null,"d":[3,2]},"b":1,"s":"x\"y"}"#
        );
    }

    #[test]
    fn test_hash_is_deterministic_and_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"title":"t","tags":["x","y"],"meta":{"k":1,"j":2}}"#)
            .unwrap();
        let b: Value = serde_json::from_str(r#"{"meta":{"j":2,"k":1},"tags":["x","y"],"title":"t"}"#)
            .unwrap();

        assert_eq!(hash_value(&a), hash_value(&a));
        assert_eq!(hash_value(&a), hash_value(&b));
        assert_eq!(hash_value(&a).len(), CONTENT_ID_LEN);
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(hash_value(&json!([1, 2])), hash_value(&json!([2, 1])));
    }

    #[test]
    fn test_hash_bytes_known_vector() {
        assert_eq!(
            hash_bytes(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_short_id() {
        let id = hash_bytes(b"x");
        assert_eq!(short_id(&id).len(), SHORT_ID_LEN);
        assert!(id.starts_with(short_id(&id)));
        assert_eq!(short_id("abc"), "abc");
        assert!(is_content_id(&id));
        assert!(!is_content_id("abc"));
    }

    #[test]
    fn test_object_id_depends_on_every_field() {
        let ts = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        let later = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_001).unwrap();
        let content = json!({"title": "t"});

        let base = object_id("note", &content, ts);
        assert_eq!(base, object_id("note", &content, ts));
        assert_ne!(base, object_id("file", &content, ts));
        assert_ne!(base, object_id("note", &json!({"title": "u"}), ts));
        assert_ne!(base, object_id("note", &content, later));
    }

    #[test]
    fn test_format_timestamp_is_millis_utc() {
        let ts = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(format_timestamp(ts), "2023-11-14T22:13:20.123Z");
    }
}
