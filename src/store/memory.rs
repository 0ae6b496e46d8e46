//! In-memory backend
//!
//! Version chains in plain hash maps under one RwLock. Used for tests and
//! for embedding the engine without a data directory; semantics match the
//! RocksDB backend exactly.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::entity::Entity;
use crate::error::{GraphError, Result};
use crate::index::VectorKey;
use crate::relation::{Relation, RelationKey};
use crate::store::backend::{GraphBackend, RowOp, WriteSet};
use crate::temporal::TimestampMs;

#[derive(Default)]
struct Tables {
    entities: HashMap<String, Vec<Entity>>,
    relations: HashMap<RelationKey, Vec<Relation>>,
    embeddings: HashMap<VectorKey, Vec<f32>>,
}

impl Tables {
    fn current_entity(&self, name: &str) -> Option<&Entity> {
        self.entities
            .get(name)?
            .iter()
            .rev()
            .find(|row| row.is_current())
    }

    fn current_relation(&self, key: &RelationKey) -> Option<&Relation> {
        self.relations
            .get(key)?
            .iter()
            .rev()
            .find(|row| row.is_current())
    }
}

/// Non-persistent [`GraphBackend`]
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphBackend for MemoryBackend {
    fn current_entity(&self, name: &str) -> Result<Option<Entity>> {
        Ok(self.inner.read().current_entity(name).cloned())
    }

    fn current_relation(&self, key: &RelationKey) -> Result<Option<Relation>> {
        Ok(self.inner.read().current_relation(key).cloned())
    }

    fn current_entities(&self) -> Result<Vec<Entity>> {
        let tables = self.inner.read();
        Ok(tables
            .entities
            .values()
            .filter_map(|versions| versions.iter().rev().find(|row| row.is_current()))
            .cloned()
            .collect())
    }

    fn current_relations(&self) -> Result<Vec<Relation>> {
        let tables = self.inner.read();
        Ok(tables
            .relations
            .values()
            .filter_map(|versions| versions.iter().rev().find(|row| row.is_current()))
            .cloned()
            .collect())
    }

    fn relations_touching(&self, name: &str) -> Result<Vec<Relation>> {
        let tables = self.inner.read();
        Ok(tables
            .relations
            .values()
            .filter_map(|versions| versions.iter().rev().find(|row| row.is_current()))
            .filter(|row| row.from == name || row.to == name)
            .cloned()
            .collect())
    }

    fn entity_history(&self, name: &str) -> Result<Vec<Entity>> {
        let tables = self.inner.read();
        let mut versions: Vec<Entity> = tables.entities.get(name).cloned().unwrap_or_default();
        versions.sort_by_key(|row| (row.version_info.valid_from, row.version_info.version));
        Ok(versions)
    }

    fn relation_history(&self, key: &RelationKey) -> Result<Vec<Relation>> {
        let tables = self.inner.read();
        let mut versions: Vec<Relation> = tables.relations.get(key).cloned().unwrap_or_default();
        versions.sort_by_key(|row| (row.version_info.valid_from, row.version_info.version));
        Ok(versions)
    }

    fn entities_at(&self, at: TimestampMs) -> Result<Vec<Entity>> {
        let tables = self.inner.read();
        Ok(tables
            .entities
            .values()
            .filter_map(|versions| {
                versions
                    .iter()
                    .find(|row| row.version_info.was_current_at(at))
            })
            .cloned()
            .collect())
    }

    fn relations_at(&self, at: TimestampMs) -> Result<Vec<Relation>> {
        let tables = self.inner.read();
        Ok(tables
            .relations
            .values()
            .filter_map(|versions| {
                versions
                    .iter()
                    .find(|row| row.version_info.was_current_at(at))
            })
            .cloned()
            .collect())
    }

    fn embeddings(&self) -> Result<Vec<(VectorKey, Vec<f32>)>> {
        let tables = self.inner.read();
        Ok(tables
            .embeddings
            .iter()
            .map(|(key, vector)| (key.clone(), vector.clone()))
            .collect())
    }

    fn apply(&self, writes: WriteSet) -> Result<()> {
        let mut tables = self.inner.write();

        // Verify every close against the committed state before mutating
        for op in &writes.ops {
            match op {
                RowOp::CloseEntity { name, expect, .. } => {
                    let current = tables.current_entity(name).map(|row| row.version_info.id);
                    if current != Some(*expect) {
                        return Err(GraphError::concurrent_update(format!("entity {name}")));
                    }
                }
                RowOp::CloseRelation { key, expect, .. } => {
                    let current = tables.current_relation(key).map(|row| row.version_info.id);
                    if current != Some(*expect) {
                        return Err(GraphError::concurrent_update(key.to_string()));
                    }
                }
                _ => {}
            }
        }

        for op in writes.ops {
            match op {
                RowOp::CloseEntity { name, expect, at } => {
                    if let Some(versions) = tables.entities.get_mut(&name) {
                        if let Some(row) = versions
                            .iter_mut()
                            .find(|row| row.version_info.id == expect)
                        {
                            row.version_info.close(at);
                        }
                    }
                }
                RowOp::InsertEntity(entity) => {
                    tables
                        .entities
                        .entry(entity.name.clone())
                        .or_default()
                        .push(entity);
                }
                RowOp::CloseRelation { key, expect, at } => {
                    if let Some(versions) = tables.relations.get_mut(&key) {
                        if let Some(row) = versions
                            .iter_mut()
                            .find(|row| row.version_info.id == expect)
                        {
                            row.version_info.close(at);
                        }
                    }
                }
                RowOp::InsertRelation(relation) => {
                    tables
                        .relations
                        .entry(relation.key())
                        .or_default()
                        .push(relation);
                }
                RowOp::PutEmbedding { key, vector } => {
                    tables.embeddings.insert(key, vector);
                }
                RowOp::RemoveEmbeddings { entity } => {
                    tables.embeddings.retain(|key, _| key.entity != entity);
                }
            }
        }

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.inner.write() = Tables::default();
        Ok(())
    }
}
