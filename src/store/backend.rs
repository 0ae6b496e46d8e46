//! Storage backend trait and write sets
//!
//! All graph semantics (versioning, validation, cascades, search) live in
//! the store; a backend only has to answer committed reads and apply a
//! [`WriteSet`] atomically. Close operations carry the row id they expect
//! to close, so a backend can reject a write set built against a state that
//! is no longer current.

use crate::entity::Entity;
use crate::error::Result;
use crate::index::VectorKey;
use crate::relation::{Relation, RelationKey};
use crate::temporal::{RowId, TimestampMs};

/// One row-level operation inside a write set
#[derive(Debug, Clone)]
pub enum RowOp {
    /// Close the current entity version of `name`, expecting its row id
    CloseEntity {
        name: String,
        expect: RowId,
        at: TimestampMs,
    },

    /// Insert a new entity row (must be current, i.e. `valid_to` is None)
    InsertEntity(Entity),

    /// Close the current relation version of `key`, expecting its row id
    CloseRelation {
        key: RelationKey,
        expect: RowId,
        at: TimestampMs,
    },

    /// Insert a new relation row (must be current)
    InsertRelation(Relation),

    /// Store an embedding vector under a key, replacing any previous one
    PutEmbedding { key: VectorKey, vector: Vec<f32> },

    /// Remove every embedding owned by an entity
    RemoveEmbeddings { entity: String },
}

/// An ordered batch of row operations applied atomically
///
/// Either every operation commits or none do. Closes are verified against
/// the committed state before anything is written; a mismatch fails the
/// whole set with [`GraphError::ConcurrentUpdate`].
///
/// [`GraphError::ConcurrentUpdate`]: crate::error::GraphError::ConcurrentUpdate
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    pub ops: Vec<RowOp>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn close_entity(&mut self, name: impl Into<String>, expect: RowId, at: TimestampMs) {
        self.ops.push(RowOp::CloseEntity {
            name: name.into(),
            expect,
            at,
        });
    }

    pub fn insert_entity(&mut self, entity: Entity) {
        self.ops.push(RowOp::InsertEntity(entity));
    }

    pub fn close_relation(&mut self, key: RelationKey, expect: RowId, at: TimestampMs) {
        self.ops.push(RowOp::CloseRelation { key, expect, at });
    }

    pub fn insert_relation(&mut self, relation: Relation) {
        self.ops.push(RowOp::InsertRelation(relation));
    }

    pub fn put_embedding(&mut self, key: VectorKey, vector: Vec<f32>) {
        self.ops.push(RowOp::PutEmbedding { key, vector });
    }

    pub fn remove_embeddings(&mut self, entity: impl Into<String>) {
        self.ops.push(RowOp::RemoveEmbeddings {
            entity: entity.into(),
        });
    }
}

/// Committed row storage
///
/// Implementations must be safe to share across threads; the store layers
/// its own write serialization on top, so `apply` is never raced by another
/// `apply` in normal operation, but the expectation checks still hold if it
/// is.
pub trait GraphBackend: Send + Sync + 'static {
    /// Current version of the named entity, if any
    fn current_entity(&self, name: &str) -> Result<Option<Entity>>;

    /// Current version of the keyed relation, if any
    fn current_relation(&self, key: &RelationKey) -> Result<Option<Relation>>;

    /// Every current entity
    fn current_entities(&self) -> Result<Vec<Entity>>;

    /// Every current relation
    fn current_relations(&self) -> Result<Vec<Relation>>;

    /// Current relations with `name` as either endpoint
    fn relations_touching(&self, name: &str) -> Result<Vec<Relation>>;

    /// All versions of the named entity, oldest first (empty if unknown)
    fn entity_history(&self, name: &str) -> Result<Vec<Entity>>;

    /// All versions of the keyed relation, oldest first (empty if unknown)
    fn relation_history(&self, key: &RelationKey) -> Result<Vec<Relation>>;

    /// Entity versions whose validity window covered `at`
    fn entities_at(&self, at: TimestampMs) -> Result<Vec<Entity>>;

    /// Relation versions whose validity window covered `at`
    fn relations_at(&self, at: TimestampMs) -> Result<Vec<Relation>>;

    /// Every persisted embedding, used to warm the in-memory index
    fn embeddings(&self) -> Result<Vec<(VectorKey, Vec<f32>)>>;

    /// Apply a write set atomically
    fn apply(&self, writes: WriteSet) -> Result<()>;

    /// Remove every row and embedding
    fn clear(&self) -> Result<()>;
}
