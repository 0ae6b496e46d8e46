//! RocksDB backend
//!
//! Persistent row storage with LZ4 compression. Every version of every
//! entity and relation is a separate row keyed by name and version number,
//! so history reads are prefix scans. Current versions are mirrored in
//! DashMap caches warmed at open; write sets land in a single WriteBatch,
//! which is what makes them atomic.

use dashmap::DashMap;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

use crate::entity::Entity;
use crate::error::{GraphError, Result};
use crate::index::VectorKey;
use crate::relation::{Relation, RelationKey};
use crate::store::backend::{GraphBackend, RowOp, WriteSet};
use crate::temporal::TimestampMs;

const ENTITY_PREFIX: &[u8] = b"ent:";
const RELATION_PREFIX: &[u8] = b"rel:";
const EMBEDDING_PREFIX: &[u8] = b"emb:";
const SEP: u8 = 0;

fn entity_prefix(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ENTITY_PREFIX.len() + name.len() + 1);
    key.extend_from_slice(ENTITY_PREFIX);
    key.extend_from_slice(name.as_bytes());
    key.push(SEP);
    key
}

fn entity_key(name: &str, version: u32) -> Vec<u8> {
    let mut key = entity_prefix(name);
    key.extend_from_slice(format!("{version:010}").as_bytes());
    key
}

fn relation_prefix(key: &RelationKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        RELATION_PREFIX.len() + key.from.len() + key.to.len() + 16,
    );
    out.extend_from_slice(RELATION_PREFIX);
    out.extend_from_slice(key.from.as_bytes());
    out.push(SEP);
    out.extend_from_slice(key.to.as_bytes());
    out.push(SEP);
    out.extend_from_slice(key.relation_type.as_str().as_bytes());
    out.push(SEP);
    out
}

fn relation_row_key(key: &RelationKey, version: u32) -> Vec<u8> {
    let mut out = relation_prefix(key);
    out.extend_from_slice(format!("{version:010}").as_bytes());
    out
}

fn embedding_prefix(entity: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(EMBEDDING_PREFIX.len() + entity.len() + 1);
    key.extend_from_slice(EMBEDDING_PREFIX);
    key.extend_from_slice(entity.as_bytes());
    key.push(SEP);
    key
}

fn embedding_key(key: &VectorKey) -> Vec<u8> {
    let mut out = embedding_prefix(&key.entity);
    out.extend_from_slice(format!("{:010}", key.slot).as_bytes());
    out
}

fn parse_embedding_key(key: &[u8]) -> Option<VectorKey> {
    let rest = key.strip_prefix(EMBEDDING_PREFIX)?;
    let sep = rest.iter().position(|b| *b == SEP)?;
    let entity = std::str::from_utf8(&rest[..sep]).ok()?.to_string();
    let slot = std::str::from_utf8(&rest[sep + 1..]).ok()?.parse().ok()?;
    Some(VectorKey { entity, slot })
}

/// Persistent [`GraphBackend`] backed by RocksDB
pub struct RocksBackend {
    db: Arc<DB>,
    current_entities: DashMap<String, Entity>,
    current_relations: DashMap<RelationKey, Relation>,
}

impl RocksBackend {
    /// Open (or create) a backend at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(2);
        opts.set_bytes_per_sync(1048576); // 1MB
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;

        log::info!("Graph backend opened at: {}", path.display());

        let backend = Self {
            db: Arc::new(db),
            current_entities: DashMap::new(),
            current_relations: DashMap::new(),
        };

        backend.load_current()?;
        Ok(backend)
    }

    /// Warm the current-version caches from disk
    fn load_current(&self) -> Result<()> {
        let mut skipped = 0;
        let iter = self.db.iterator(IteratorMode::Start);

        for item in iter {
            let (key, value) = item?;

            if key.starts_with(ENTITY_PREFIX) {
                match bincode::deserialize::<Entity>(&value) {
                    Ok(row) => {
                        if row.is_current() {
                            self.current_entities.insert(row.name.clone(), row);
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to deserialize entity row: {}. Skipping.", e);
                        skipped += 1;
                    }
                }
            } else if key.starts_with(RELATION_PREFIX) {
                match bincode::deserialize::<Relation>(&value) {
                    Ok(row) => {
                        if row.is_current() {
                            self.current_relations.insert(row.key(), row);
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to deserialize relation row: {}. Skipping.", e);
                        skipped += 1;
                    }
                }
            }
        }

        if !self.current_entities.is_empty() || !self.current_relations.is_empty() {
            log::info!(
                "Loaded {} entities and {} relations from disk",
                self.current_entities.len(),
                self.current_relations.len()
            );
        }
        if skipped > 0 {
            log::warn!("Skipped {} rows due to deserialization errors", skipped);
        }

        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key, value));
        }

        Ok(rows)
    }
}

enum CacheOp {
    RemoveEntity(String),
    PutEntity(Entity),
    RemoveRelation(RelationKey),
    PutRelation(Relation),
}

impl GraphBackend for RocksBackend {
    fn current_entity(&self, name: &str) -> Result<Option<Entity>> {
        Ok(self.current_entities.get(name).map(|row| row.clone()))
    }

    fn current_relation(&self, key: &RelationKey) -> Result<Option<Relation>> {
        Ok(self.current_relations.get(key).map(|row| row.clone()))
    }

    fn current_entities(&self) -> Result<Vec<Entity>> {
        Ok(self
            .current_entities
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn current_relations(&self) -> Result<Vec<Relation>> {
        Ok(self
            .current_relations
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn relations_touching(&self, name: &str) -> Result<Vec<Relation>> {
        Ok(self
            .current_relations
            .iter()
            .filter(|entry| entry.value().from == name || entry.value().to == name)
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn entity_history(&self, name: &str) -> Result<Vec<Entity>> {
        let mut versions = Vec::new();
        for (_, value) in self.scan_prefix(&entity_prefix(name))? {
            match bincode::deserialize::<Entity>(&value) {
                Ok(row) => versions.push(row),
                Err(e) => log::warn!("Failed to deserialize entity row: {}. Skipping.", e),
            }
        }
        versions.sort_by_key(|row| (row.version_info.valid_from, row.version_info.version));
        Ok(versions)
    }

    fn relation_history(&self, key: &RelationKey) -> Result<Vec<Relation>> {
        let mut versions = Vec::new();
        for (_, value) in self.scan_prefix(&relation_prefix(key))? {
            match bincode::deserialize::<Relation>(&value) {
                Ok(row) => versions.push(row),
                Err(e) => log::warn!("Failed to deserialize relation row: {}. Skipping.", e),
            }
        }
        versions.sort_by_key(|row| (row.version_info.valid_from, row.version_info.version));
        Ok(versions)
    }

    fn entities_at(&self, at: TimestampMs) -> Result<Vec<Entity>> {
        let mut rows = Vec::new();
        for (_, value) in self.scan_prefix(ENTITY_PREFIX)? {
            match bincode::deserialize::<Entity>(&value) {
                Ok(row) => {
                    if row.version_info.was_current_at(at) {
                        rows.push(row);
                    }
                }
                Err(e) => log::warn!("Failed to deserialize entity row: {}. Skipping.", e),
            }
        }
        Ok(rows)
    }

    fn relations_at(&self, at: TimestampMs) -> Result<Vec<Relation>> {
        let mut rows = Vec::new();
        for (_, value) in self.scan_prefix(RELATION_PREFIX)? {
            match bincode::deserialize::<Relation>(&value) {
                Ok(row) => {
                    if row.version_info.was_current_at(at) {
                        rows.push(row);
                    }
                }
                Err(e) => log::warn!("Failed to deserialize relation row: {}. Skipping.", e),
            }
        }
        Ok(rows)
    }

    fn embeddings(&self) -> Result<Vec<(VectorKey, Vec<f32>)>> {
        let mut out = Vec::new();
        for (key, value) in self.scan_prefix(EMBEDDING_PREFIX)? {
            let Some(vector_key) = parse_embedding_key(&key) else {
                log::warn!("Skipping malformed embedding key");
                continue;
            };
            match bincode::deserialize::<Vec<f32>>(&value) {
                Ok(vector) => out.push((vector_key, vector)),
                Err(e) => log::warn!("Failed to deserialize embedding: {}. Skipping.", e),
            }
        }
        Ok(out)
    }

    fn apply(&self, writes: WriteSet) -> Result<()> {
        let mut batch = WriteBatch::default();
        let mut cache_ops = Vec::new();

        for op in &writes.ops {
            match op {
                RowOp::CloseEntity { name, expect, at } => {
                    let mut row = match self.current_entities.get(name) {
                        Some(row) if row.version_info.id == *expect => row.clone(),
                        _ => {
                            return Err(GraphError::concurrent_update(format!("entity {name}")))
                        }
                    };
                    row.version_info.close(*at);
                    batch.put(
                        entity_key(name, row.version_info.version),
                        bincode::serialize(&row)?,
                    );
                    cache_ops.push(CacheOp::RemoveEntity(name.clone()));
                }
                RowOp::InsertEntity(entity) => {
                    batch.put(
                        entity_key(&entity.name, entity.version_info.version),
                        bincode::serialize(entity)?,
                    );
                    cache_ops.push(CacheOp::PutEntity(entity.clone()));
                }
                RowOp::CloseRelation { key, expect, at } => {
                    let mut row = match self.current_relations.get(key) {
                        Some(row) if row.version_info.id == *expect => row.clone(),
                        _ => return Err(GraphError::concurrent_update(key.to_string())),
                    };
                    row.version_info.close(*at);
                    batch.put(
                        relation_row_key(key, row.version_info.version),
                        bincode::serialize(&row)?,
                    );
                    cache_ops.push(CacheOp::RemoveRelation(key.clone()));
                }
                RowOp::InsertRelation(relation) => {
                    batch.put(
                        relation_row_key(&relation.key(), relation.version_info.version),
                        bincode::serialize(relation)?,
                    );
                    cache_ops.push(CacheOp::PutRelation(relation.clone()));
                }
                RowOp::PutEmbedding { key, vector } => {
                    batch.put(embedding_key(key), bincode::serialize(vector)?);
                }
                RowOp::RemoveEmbeddings { entity } => {
                    for (key, _) in self.scan_prefix(&embedding_prefix(entity))? {
                        batch.delete(key);
                    }
                }
            }
        }

        self.db.write(batch)?;
        self.db.flush()?;

        for op in cache_ops {
            match op {
                CacheOp::RemoveEntity(name) => {
                    self.current_entities.remove(&name);
                }
                CacheOp::PutEntity(entity) => {
                    self.current_entities.insert(entity.name.clone(), entity);
                }
                CacheOp::RemoveRelation(key) => {
                    self.current_relations.remove(&key);
                }
                CacheOp::PutRelation(relation) => {
                    self.current_relations.insert(relation.key(), relation);
                }
            }
        }

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut batch = WriteBatch::default();
        let iter = self.db.iterator(IteratorMode::Start);
        for item in iter {
            let (key, _) = item?;
            batch.delete(key);
        }

        self.db.write(batch)?;
        self.db.flush()?;

        self.current_entities.clear();
        self.current_relations.clear();
        Ok(())
    }
}
