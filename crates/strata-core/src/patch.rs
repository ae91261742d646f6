//! Patch operations and their persisted shape.
//!
//! A patch is an object of type `patch` whose content is
//!
//! ```text
//! {op, target, agent, parentId?, payload, confidence?, evidence?, note?}
//! ```
//!
//! The `payload` shape depends on `op`:
//!
//! | op       | payload                                   |
//! |----------|-------------------------------------------|
//! | `add`    | `{type, content}` of the added object     |
//! | `update` | object of fields to shallow-merge         |
//! | `delete` | `null`                                    |
//! | `link`   | relation `{from, to, kind, props?}` or `null` |
//! | `merge`  | `{sources: [id, ...]}`                    |

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::{StrataError, StrataResult};
use crate::hash::now_millis;
use crate::object::Object;
use crate::payload::{ObjectType, Payload, RelationPayload};

// ============================================================================
// PatchOp
// ============================================================================

/// Operation discriminator as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Update,
    Delete,
    Link,
    Merge,
}

impl PatchOpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Link => "link",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for PatchOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A patch operation with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Materialize an object at the target.
    Add { payload: Payload },
    /// Shallow-merge fields into the live target.
    Update { changes: Map<String, Value> },
    /// Tombstone the target.
    Delete,
    /// Write a relation at the target; no-op without relation data.
    Link { relation: Option<RelationPayload> },
    /// Tombstone every source. The target itself is left alone.
    Merge { sources: Vec<String> },
}

impl PatchOp {
    pub fn kind(&self) -> PatchOpKind {
        match self {
            Self::Add { .. } => PatchOpKind::Add,
            Self::Update { .. } => PatchOpKind::Update,
            Self::Delete => PatchOpKind::Delete,
            Self::Link { .. } => PatchOpKind::Link,
            Self::Merge { .. } => PatchOpKind::Merge,
        }
    }

    fn payload_value(&self) -> Value {
        match self {
            Self::Add { payload } => json!({
                "type": payload.object_type().as_str(),
                "content": payload.to_content(),
            }),
            Self::Update { changes } => Value::Object(changes.clone()),
            Self::Delete => Value::Null,
            Self::Link { relation } => relation
                .as_ref()
                .map(|r| Payload::Relation(r.clone()).to_content())
                .unwrap_or(Value::Null),
            Self::Merge { sources } => json!({ "sources": sources }),
        }
    }

    fn from_wire(kind: PatchOpKind, payload: Value) -> StrataResult<Self> {
        match kind {
            PatchOpKind::Add => {
                let AddPayloadWire {
                    object_type,
                    content,
                } = serde_json::from_value(payload).map_err(|e| {
                    StrataError::validation(format!("add payload must be {{type, content}}: {e}"))
                })?;
                Ok(Self::Add {
                    payload: Payload::from_parts(&ObjectType::from(object_type), content),
                })
            }
            PatchOpKind::Update => match payload {
                Value::Object(changes) => Ok(Self::Update { changes }),
                Value::Null => Ok(Self::Update {
                    changes: Map::new(),
                }),
                other => Err(StrataError::validation(format!(
                    "update payload must be an object, got {other}"
                ))),
            },
            PatchOpKind::Delete => Ok(Self::Delete),
            PatchOpKind::Link => {
                if payload.is_null() {
                    return Ok(Self::Link { relation: None });
                }
                let relation = serde_json::from_value(payload).map_err(|e| {
                    StrataError::validation(format!("link payload is not a relation: {e}"))
                })?;
                Ok(Self::Link {
                    relation: Some(relation),
                })
            }
            PatchOpKind::Merge => {
                let MergePayloadWire { sources } =
                    serde_json::from_value(payload).map_err(|e| {
                        StrataError::validation(format!("merge payload must be {{sources}}: {e}"))
                    })?;
                Ok(Self::Merge { sources })
            }
        }
    }
}

#[derive(Deserialize)]
struct AddPayloadWire {
    #[serde(rename = "type")]
    object_type: String,
    #[serde(default)]
    content: Value,
}

#[derive(Deserialize)]
struct MergePayloadWire {
    sources: Vec<String>,
}

// ============================================================================
// Patch
// ============================================================================

/// Decoded patch content.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub op: PatchOp,

    /// Projection object the patch acts on.
    pub target: String,

    /// Who produced the patch.
    pub agent: String,

    /// HEAD of the view when the patch was committed.
    pub parent_id: Option<String>,

    pub confidence: Option<f64>,

    pub evidence: Option<Value>,

    pub note: Option<String>,
}

/// Persisted patch content, before the payload is decoded by op.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchWire {
    op: PatchOpKind,
    target: String,
    agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    evidence: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl Patch {
    /// Encode as persisted object content.
    pub fn to_content(&self) -> Value {
        let wire = PatchWire {
            op: self.op.kind(),
            target: self.target.clone(),
            agent: self.agent.clone(),
            parent_id: self.parent_id.clone(),
            payload: self.op.payload_value(),
            confidence: self.confidence,
            evidence: self.evidence.clone(),
            note: self.note.clone(),
        };
        // PatchWire has only string keys; a non-finite confidence is the one
        // thing that fails, and it encodes as null.
        serde_json::to_value(wire).unwrap_or(Value::Null)
    }

    /// Decode persisted object content.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Validation`] if the content is not a patch or
    /// its payload does not match its op.
    pub fn from_content(content: &Value) -> StrataResult<Self> {
        let wire: PatchWire = serde_json::from_value(content.clone())
            .map_err(|e| StrataError::validation(format!("malformed patch: {e}")))?;
        let op = PatchOp::from_wire(wire.op, wire.payload)?;
        Ok(Self {
            op,
            target: wire.target,
            agent: wire.agent,
            parent_id: wire.parent_id,
            confidence: wire.confidence,
            evidence: wire.evidence,
            note: wire.note,
        })
    }
}

/// A committed patch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRecord {
    pub id: String,
    pub patch: Patch,
    pub created_at: DateTime<Utc>,
}

impl PatchRecord {
    /// Decode a stored patch object.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Validation`] if the object is not a well-formed
    /// patch.
    pub fn from_object(object: &Object) -> StrataResult<Self> {
        if object.object_type != ObjectType::Patch {
            return Err(StrataError::validation(format!(
                "object {} is a {}, not a patch",
                object.short_id(),
                object.object_type
            )));
        }
        Ok(Self {
            id: object.id.clone(),
            patch: Patch::from_content(&object.content)?,
            created_at: object.created_at,
        })
    }
}

// ============================================================================
// PatchRequest
// ============================================================================

/// A patch to commit, before the session fills in agent and parent.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    pub op: PatchOp,
    pub target: String,
    /// Objects written alongside the patch (the snapshot an `add` creates).
    pub objects: Vec<Object>,
    pub confidence: Option<f64>,
    pub evidence: Option<Value>,
    pub note: Option<String>,
}

impl PatchRequest {
    fn new(op: PatchOp, target: impl Into<String>) -> Self {
        Self {
            op,
            target: target.into(),
            objects: Vec::new(),
            confidence: None,
            evidence: None,
            note: None,
        }
    }

    /// Create a new object from a payload.
    ///
    /// The target is the content address of the new object, which is stored
    /// together with the patch.
    pub fn create(payload: Payload) -> Self {
        let object = Object::from_payload(&payload, now_millis());
        let mut request = Self::new(PatchOp::Add { payload }, object.id.clone());
        request.objects.push(object);
        request
    }

    /// Add a payload at an existing id (e.g. to resurrect a deleted object).
    pub fn add(target: impl Into<String>, payload: Payload) -> Self {
        Self::new(PatchOp::Add { payload }, target)
    }

    /// Shallow-merge `changes` into the target.
    pub fn update(target: impl Into<String>, changes: Map<String, Value>) -> Self {
        Self::new(PatchOp::Update { changes }, target)
    }

    /// Tombstone the target.
    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(PatchOp::Delete, target)
    }

    /// Record a relation as a new object.
    pub fn link(relation: RelationPayload) -> Self {
        let object = Object::from_payload(&Payload::Relation(relation.clone()), now_millis());
        let mut request = Self::new(
            PatchOp::Link {
                relation: Some(relation),
            },
            object.id.clone(),
        );
        request.objects.push(object);
        request
    }

    /// Link at an explicit target; without relation data this is a no-op.
    pub fn link_at(target: impl Into<String>, relation: Option<RelationPayload>) -> Self {
        Self::new(PatchOp::Link { relation }, target)
    }

    /// Tombstone `sources` as merged into `target`.
    pub fn merge(target: impl Into<String>, sources: Vec<String>) -> Self {
        Self::new(PatchOp::Merge { sources }, target)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_evidence(mut self, evidence: Value) -> Self {
        self.evidence = Some(evidence);
        self
    }

    /// Fill in agent and parent.
    pub(crate) fn into_patch(self, agent: &str, parent_id: Option<String>) -> (Patch, Vec<Object>) {
        let patch = Patch {
            op: self.op,
            target: self.target,
            agent: agent.to_string(),
            parent_id,
            confidence: self.confidence,
            evidence: self.evidence,
            note: self.note,
        };
        (patch, self.objects)
    }
}
