//! Content-addressed objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_db::ObjectRecord;

use crate::errors::{StrataError, StrataResult};
use crate::hash::{self, short_id, truncate_to_millis};
use crate::payload::{ObjectType, Payload};

/// An immutable object.
///
/// `id` is always the content address of `{type, content, createdAt}`;
/// [`Object::new`] computes it and [`Object::verify`] re-checks it for
/// objects read back from a store or a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    pub id: String,

    #[serde(rename = "type")]
    pub object_type: ObjectType,

    pub content: Value,

    pub created_at: DateTime<Utc>,
}

impl Object {
    /// Build an object and compute its id.
    ///
    /// `created_at` is truncated to milliseconds first.
    pub fn new(object_type: ObjectType, content: Value, created_at: DateTime<Utc>) -> Self {
        let created_at = truncate_to_millis(created_at);
        let id = hash::object_id(object_type.as_str(), &content, created_at);
        Self {
            id,
            object_type,
            content,
            created_at,
        }
    }

    /// Build an object from a typed payload.
    pub fn from_payload(payload: &Payload, created_at: DateTime<Utc>) -> Self {
        Self::new(payload.object_type(), payload.to_content(), created_at)
    }

    /// Recompute the content address from the current fields.
    pub fn compute_id(&self) -> String {
        hash::object_id(self.object_type.as_str(), &self.content, self.created_at)
    }

    /// Check that the object hashes to its id.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Integrity`] on mismatch.
    pub fn verify(&self) -> StrataResult<()> {
        let actual = self.compute_id();
        if actual == self.id {
            Ok(())
        } else {
            Err(StrataError::Integrity {
                id: self.id.clone(),
                actual,
            })
        }
    }

    /// Decode the content into a typed payload.
    pub fn payload(&self) -> Payload {
        Payload::from_parts(&self.object_type, self.content.clone())
    }

    /// Display prefix of the id.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// Convert into the persisted row.
    pub fn to_record(&self) -> ObjectRecord {
        ObjectRecord {
            id: self.id.clone(),
            object_type: self.object_type.to_string(),
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}

impl From<ObjectRecord> for Object {
    fn from(record: ObjectRecord) -> Self {
        Self {
            id: record.id,
            object_type: ObjectType::from(record.object_type),
            content: record.content,
            created_at: record.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_new_truncates_to_millis() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let obj = Object::new(ObjectType::Note, json!({"title": "t"}), ts);

        assert_eq!(obj.created_at.timestamp_subsec_nanos(), 123_000_000);
        assert!(obj.verify().is_ok());
    }

    #[test]
    fn test_tampered_content_fails_verify() {
        let mut obj = Object::new(ObjectType::Note, json!({"title": "t"}), Utc::now());
        obj.content = json!({"title": "tampered"});

        match obj.verify() {
            Err(StrataError::Integrity { id, actual }) => {
                assert_eq!(id, obj.id);
                assert_ne!(actual, obj.id);
            }
            other => panic!("expected integrity error, got {other:?}"),
        }
    }

    #[test]
    fn test_record_conversion_preserves_id() {
        let obj = Object::new(ObjectType::from("bookmark"), json!({"url": "x"}), Utc::now());
        let back = Object::from(obj.to_record());
        assert_eq!(back, obj);
        assert!(back.verify().is_ok());
    }
}
