//! Entity rows and drafts
//!
//! An entity is addressed by its logical `name`; the store keeps a chain of
//! versioned rows per name, of which at most one is current.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::temporal::VersionInfo;

/// Categories of entities tracked in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Feature,
    Task,
    Decision,
    Component,
    Test,
}

impl EntityType {
    /// Stable string form used in keys and stats
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Task => "task",
            Self::Decision => "decision",
            Self::Component => "component",
            Self::Test => "test",
        }
    }

    /// All known entity types
    pub fn all() -> &'static [EntityType] {
        &[
            Self::Feature,
            Self::Task,
            Self::Decision,
            Self::Component,
            Self::Test,
        ]
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored version of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Logical identifier, unique among current entities
    pub name: String,

    /// Category of the entity
    pub entity_type: EntityType,

    /// Free-text facts attached to the entity, in insertion order
    #[serde(default)]
    pub observations: Vec<String>,

    /// Bi-temporal envelope
    pub version_info: VersionInfo,
}

impl Entity {
    /// Check if this row is the current version
    pub fn is_current(&self) -> bool {
        self.version_info.is_current()
    }

    /// Get the searchable text for this entity
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.name, self.observations.join(" "))
    }

    /// Case-insensitive substring match over name and observations
    pub fn matches_query(&self, lowered_query: &str) -> bool {
        self.searchable_text().to_lowercase().contains(lowered_query)
    }
}

/// Input for creating a new entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDraft {
    pub name: String,
    pub entity_type: EntityType,

    #[serde(default)]
    pub observations: Vec<String>,

    /// Optional embedding of the entity's primary content, stored in the
    /// vector index under observation slot 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Actor recorded on the created version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

impl EntityDraft {
    /// Create a draft with just a name and type
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            observations: Vec::new(),
            embedding: None,
            changed_by: None,
        }
    }

    /// Add an observation
    pub fn observation(mut self, content: impl Into<String>) -> Self {
        self.observations.push(content.into());
        self
    }

    /// Set the embedding vector
    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Set the actor recorded on the created version
    pub fn changed_by(mut self, actor: impl Into<String>) -> Self {
        self.changed_by = Some(actor.into());
        self
    }

    /// Reject drafts that could not be addressed or keyed later
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)
    }
}

/// Names key every row and appear inside composite storage keys, so they
/// must be non-blank and free of NUL separators.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(GraphError::validation("entity name must not be blank"));
    }
    if name.contains('\0') {
        return Err(GraphError::validation(format!(
            "entity name {name:?} contains a NUL byte"
        )));
    }
    Ok(())
}
