//! Relation rows, keys, and drafts
//!
//! A relation is identified by the `(from, to, relation_type)` triple of
//! entity names. Like entities, relations are stored as versioned rows; the
//! endpoint row ids are denormalized onto each version for provenance but
//! the names stay authoritative.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::validate_name;
use crate::error::{GraphError, Result};
use crate::temporal::{RowId, VersionInfo};

/// Kinds of edges tracked between entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Implements,
    DependsOn,
    RelatesTo,
    PartOf,
}

impl RelationType {
    /// Stable string form used in keys and stats
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implements => "implements",
            Self::DependsOn => "depends_on",
            Self::RelatesTo => "relates_to",
            Self::PartOf => "part_of",
        }
    }

    /// All known relation types
    pub fn all() -> &'static [RelationType] {
        &[
            Self::Implements,
            Self::DependsOn,
            Self::RelatesTo,
            Self::PartOf,
        ]
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical identity of a relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationKey {
    pub from: String,
    pub to: String,
    pub relation_type: RelationType,
}

impl RelationKey {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation_type,
        }
    }
}

impl std::fmt::Display for RelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from, self.relation_type, self.to)
    }
}

/// One stored version of a relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Source entity name
    pub from: String,

    /// Target entity name
    pub to: String,

    /// Row id of the source entity version current when this row was written
    pub from_id: RowId,

    /// Row id of the target entity version current when this row was written
    pub to_id: RowId,

    /// Kind of edge
    pub relation_type: RelationType,

    /// Edge weight in `[0, 1]`
    ///
    /// Serialized even when `None`: rows round-trip through bincode, which
    /// cannot resynchronize on skipped fields.
    pub strength: Option<f32>,

    /// Belief score in `[0, 1]`, subject to read-time decay
    pub confidence: Option<f32>,

    /// Open metadata map; the store maintains `createdAt` and `updatedAt`
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Bi-temporal envelope
    pub version_info: VersionInfo,
}

impl Relation {
    /// Logical identity of this relation
    pub fn key(&self) -> RelationKey {
        RelationKey {
            from: self.from.clone(),
            to: self.to.clone(),
            relation_type: self.relation_type,
        }
    }

    /// Check if this row is the current version
    pub fn is_current(&self) -> bool {
        self.version_info.is_current()
    }
}

/// Input for creating a new relation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDraft {
    pub from: String,
    pub to: String,
    pub relation_type: RelationType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

impl RelationDraft {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation_type,
            strength: None,
            confidence: None,
            metadata: Map::new(),
            changed_by: None,
        }
    }

    pub fn strength(mut self, strength: f32) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn changed_by(mut self, actor: impl Into<String>) -> Self {
        self.changed_by = Some(actor.into());
        self
    }

    /// Logical identity the draft resolves to
    pub fn key(&self) -> RelationKey {
        RelationKey {
            from: self.from.clone(),
            to: self.to.clone(),
            relation_type: self.relation_type,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.from)?;
        validate_name(&self.to)?;
        validate_unit_interval("strength", self.strength)?;
        validate_unit_interval("confidence", self.confidence)?;
        Ok(())
    }
}

/// Input for updating the current version of a relation
///
/// `strength`, `confidence`, and `metadata` replace the stored values when
/// provided and are preserved when `None`. The identity triple is never
/// changed by an update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationUpdate {
    pub from: String,
    pub to: String,
    pub relation_type: RelationType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

impl RelationUpdate {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation_type,
            strength: None,
            confidence: None,
            metadata: None,
            changed_by: None,
        }
    }

    pub fn strength(mut self, strength: f32) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn changed_by(mut self, actor: impl Into<String>) -> Self {
        self.changed_by = Some(actor.into());
        self
    }

    /// Logical identity the update targets
    pub fn key(&self) -> RelationKey {
        RelationKey {
            from: self.from.clone(),
            to: self.to.clone(),
            relation_type: self.relation_type,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.from)?;
        validate_name(&self.to)?;
        validate_unit_interval("strength", self.strength)?;
        validate_unit_interval("confidence", self.confidence)?;
        Ok(())
    }
}

pub(crate) fn validate_unit_interval(field: &str, value: Option<f32>) -> Result<()> {
    if let Some(v) = value {
        if !v.is_finite() || !(0.0..=1.0).contains(&v) {
            return Err(GraphError::validation(format!(
                "{field} must be within [0, 1], got {v}"
            )));
        }
    }
    Ok(())
}
