//! Typed object payloads.
//!
//! Object content is persisted as JSON, but inside the core it is one of a
//! closed set of shapes keyed by object type. Content that does not decode
//! into the shape of its type, or whose type is unknown, is carried as
//! [`Payload::Opaque`] so newer payload shapes survive a round-trip through
//! older code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// ObjectType
// ============================================================================

/// Object type discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ObjectType {
    Patch,
    Note,
    File,
    Relation,
    /// Any type this build does not know.
    Other(String),
}

impl ObjectType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Patch => "patch",
            Self::Note => "note",
            Self::File => "file",
            Self::Relation => "relation",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for ObjectType {
    fn from(value: &str) -> Self {
        match value {
            "patch" => Self::Patch,
            "note" => Self::Note,
            "file" => Self::File,
            "relation" => Self::Relation,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ObjectType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ObjectType> for String {
    fn from(value: ObjectType) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for ObjectType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payload shapes
// ============================================================================

/// A text note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePayload {
    pub title: String,

    #[serde(default)]
    pub body: String,

    /// Source-relative path the note was harvested from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Fields added by later updates.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An opaque file tracked by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub path: String,

    pub name: String,

    pub size: u64,

    /// Content address of the file bytes.
    pub content_id: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A directed relation between two objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationPayload {
    pub from: String,

    pub to: String,

    /// Relationship kind (e.g. "references", "derivedFrom").
    pub kind: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub props: Value,
}

impl RelationPayload {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: kind.into(),
            props: Value::Null,
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Content of a non-patch object.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Note(NotePayload),
    File(FilePayload),
    Relation(RelationPayload),
    /// Content of an unknown type, or content that does not decode into the
    /// shape of its type.
    Opaque {
        object_type: ObjectType,
        content: Value,
    },
}

impl Payload {
    /// Decode persisted content for a type.
    ///
    /// Content decodes into its typed shape only when encoding that shape
    /// gives back the same JSON; anything else stays [`Payload::Opaque`], so
    /// `from_parts(ty, c).to_content() == c` always holds.
    pub fn from_parts(object_type: &ObjectType, content: Value) -> Self {
        let decoded = match object_type {
            ObjectType::Note => serde_json::from_value(content.clone()).map(Self::Note).ok(),
            ObjectType::File => serde_json::from_value(content.clone()).map(Self::File).ok(),
            ObjectType::Relation => serde_json::from_value(content.clone())
                .map(Self::Relation)
                .ok(),
            ObjectType::Patch | ObjectType::Other(_) => None,
        };
        let decoded = decoded.filter(|payload| payload.to_content() == content);
        decoded.unwrap_or_else(|| Self::Opaque {
            object_type: object_type.clone(),
            content,
        })
    }

    /// Type of this payload.
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Note(_) => ObjectType::Note,
            Self::File(_) => ObjectType::File,
            Self::Relation(_) => ObjectType::Relation,
            Self::Opaque { object_type, .. } => object_type.clone(),
        }
    }

    /// Encode as persisted JSON content.
    pub fn to_content(&self) -> Value {
        // Serializing these shapes cannot fail: every key is a string and
        // there are no non-finite floats.
        let encoded = match self {
            Self::Note(note) => serde_json::to_value(note),
            Self::File(file) => serde_json::to_value(file),
            Self::Relation(relation) => serde_json::to_value(relation),
            Self::Opaque { content, .. } => return content.clone(),
        };
        encoded.unwrap_or(Value::Null)
    }
}
