//! Versioned graph store
//!
//! The store keeps every entity and relation as a chain of immutable row
//! versions. A logical update closes the current row (stamping `valid_to`)
//! and inserts a successor in the same atomic write set, so point-in-time
//! reads can replay the graph as it stood at any past instant. Alongside the
//! committed rows it maintains a vector index for semantic search, projects
//! confidence decay onto relations at read time, and caches search results
//! under a byte budget.

mod backend;
mod memory;
mod rocks;

pub use backend::{GraphBackend, RowOp, WriteSet};
pub use memory::MemoryBackend;
pub use rocks::RocksBackend;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{serialized_weight, CacheConfig, CacheKey, CacheStats, CacheWeight, SearchCache};
use crate::decay::DecayConfig;
use crate::embedding::EmbeddingProvider;
use crate::entity::{validate_name, Entity, EntityDraft, EntityType};
use crate::error::{GraphError, Result};
use crate::index::{IndexStats, VectorIndex, VectorIndexConfig, VectorKey};
use crate::relation::{
    validate_unit_interval, Relation, RelationDraft, RelationKey, RelationUpdate,
};
use crate::temporal::{now_ms, RowId, TimestampMs, VersionInfo};
use crate::traversal::{bfs, TraversalNode, TraversalOptions, TraversalResult};

/// Store-wide configuration
#[derive(Debug, Clone, Default)]
pub struct GraphStoreConfig {
    /// Read-time confidence decay
    pub decay: DecayConfig,

    /// Vector index sizing and build knobs
    pub index: VectorIndexConfig,

    /// Search result cache budget and TTL
    pub cache: CacheConfig,
}

/// A snapshot of every current entity and relation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// Observations to append to one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationAdd {
    pub entity_name: String,
    pub contents: Vec<String>,

    /// Optional vectors aligned one-to-one with `contents`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<Vec<f32>>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

impl ObservationAdd {
    pub fn new(entity_name: impl Into<String>, contents: Vec<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            contents,
            embeddings: None,
            changed_by: None,
        }
    }
}

/// What actually got appended for one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationAddResult {
    pub entity_name: String,

    /// Contents that were new; duplicates of existing observations are
    /// dropped and do not appear here.
    pub added: Vec<String>,
}

/// Observations to remove from one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationDelete {
    pub entity_name: String,
    pub observations: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

impl ObservationDelete {
    pub fn new(entity_name: impl Into<String>, observations: Vec<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            observations,
            changed_by: None,
        }
    }
}

/// Filters for keyword search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Restrict matches to one entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,

    /// Maximum number of entities returned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Knobs for semantic search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticSearchOptions {
    /// Maximum number of hits returned
    pub limit: usize,

    /// Similarity floor in `[0, 1]`; hits below it are dropped
    pub min_similarity: f32,
}

impl Default for SemanticSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_similarity: 0.0,
        }
    }
}

/// How a semantic search hit was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrigin {
    /// Matched by vector similarity
    Semantic,

    /// Matched by keyword fallback; similarity is reported as 0.0
    Keyword,
}

/// One semantic search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticHit {
    pub entity: Entity,
    pub similarity: f32,
    pub origin: MatchOrigin,
}

/// Cached form of a search result: names and scores only. Entities are
/// re-read from committed rows on every return, so a cached ranking never
/// resurrects a deleted entity or serves a stale row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawHit {
    entity: String,
    slot: u32,
    similarity: f32,
    origin: MatchOrigin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedHits(Vec<RawHit>);

impl CacheWeight for CachedHits {
    fn weight(&self) -> usize {
        serialized_weight(&self.0)
    }
}

/// Counters reported by [`GraphStore::stats`]
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Current entity count
    pub entities: usize,

    /// Current relation count
    pub relations: usize,

    pub entities_by_type: BTreeMap<String, usize>,
    pub relations_by_type: BTreeMap<String, usize>,

    pub index: IndexStats,
    pub cache: CacheStats,
}

/// Bitemporal knowledge graph over a pluggable row backend
///
/// All mutations funnel through a single logical write lock, so version
/// chains never interleave. Reads go straight to the backend and are safe
/// to run concurrently with writes.
pub struct GraphStore<B: GraphBackend> {
    backend: B,
    index: VectorIndex,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    decay: DecayConfig,
    search_cache: SearchCache<CachedHits>,

    /// Serializes read-modify-write cycles across operations
    write_lock: Mutex<()>,
}

impl GraphStore<RocksBackend> {
    /// Open a persistent store at `path`, creating it if absent
    pub fn open(path: impl AsRef<Path>, config: GraphStoreConfig) -> Result<Self> {
        Self::new(RocksBackend::open(path)?, config)
    }
}

impl<B: GraphBackend> GraphStore<B> {
    /// Create a store over `backend`, warming the vector index from any
    /// persisted embeddings
    pub fn new(backend: B, config: GraphStoreConfig) -> Result<Self> {
        let index = VectorIndex::new(config.index);
        let mut warmed = 0usize;
        for (key, vector) in backend.embeddings()? {
            match index.upsert(key.clone(), &vector) {
                Ok(()) => warmed += 1,
                Err(e) => {
                    log::warn!("Skipping persisted embedding {}#{}: {}", key.entity, key.slot, e)
                }
            }
        }
        if warmed > 0 {
            log::info!("Warmed vector index with {} embeddings", warmed);
        }
        Ok(Self {
            backend,
            index,
            embedder: None,
            decay: config.decay,
            search_cache: SearchCache::new(config.cache),
            write_lock: Mutex::new(()),
        })
    }

    /// Attach an embedding provider used to embed semantic queries
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Create new entities, optionally with an entity-level embedding each
    ///
    /// The whole batch is validated before anything is written and lands in
    /// one atomic write set. A name that already has a current version is a
    /// validation error, as is the same name appearing twice in the batch.
    /// Re-creating a deleted name continues its version chain instead of
    /// restarting at version 1.
    pub async fn create_entities(&self, drafts: Vec<EntityDraft>) -> Result<Vec<Entity>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        for draft in &drafts {
            draft.validate()?;
            if !seen.insert(draft.name.clone()) {
                return Err(GraphError::validation(format!(
                    "duplicate entity name in batch: {}",
                    draft.name
                )));
            }
        }
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            vectors.push(match &draft.embedding {
                Some(vector) => Some(self.index.normalize(vector)?),
                None => None,
            });
        }

        let _write = self.write_lock.lock();
        let now = now_ms();

        // A deleted name keeps its version chain: the new life continues
        // numbering after the closed rows
        let mut priors: Vec<Option<VersionInfo>> = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            if self.backend.current_entity(&draft.name)?.is_some() {
                return Err(GraphError::validation(format!(
                    "entity already exists: {}",
                    draft.name
                )));
            }
            priors.push(
                self.backend
                    .entity_history(&draft.name)?
                    .pop()
                    .map(|row| row.version_info),
            );
        }

        let mut writes = WriteSet::new();
        let mut created = Vec::with_capacity(drafts.len());
        let mut index_updates: Vec<(VectorKey, Vec<f32>)> = Vec::new();
        for ((draft, vector), prior) in drafts.into_iter().zip(vectors).zip(priors) {
            let version_info = match prior {
                Some(prior) => prior.successor(now, draft.changed_by),
                None => VersionInfo::initial(now, draft.changed_by),
            };
            let entity = Entity {
                name: draft.name,
                entity_type: draft.entity_type,
                observations: draft.observations,
                version_info,
            };
            if let Some(vector) = vector {
                // Slot 0 carries the entity-level vector
                let key = VectorKey::new(entity.name.clone(), 0);
                writes.put_embedding(key.clone(), vector.clone());
                index_updates.push((key, vector));
            }
            writes.insert_entity(entity.clone());
            created.push(entity);
        }

        self.backend.apply(writes)?;
        for (key, vector) in index_updates {
            if let Err(e) = self.index.upsert(key, &vector) {
                log::warn!("Vector index update failed: {}", e);
            }
        }
        log::debug!("Created {} entities", created.len());
        Ok(created)
    }

    /// Create new relations between existing entities
    ///
    /// Every endpoint must have a current version or the whole batch is
    /// rejected with the sorted list of missing names. A relation whose key
    /// already has a current version is skipped rather than duplicated; a
    /// key with only closed history continues its version chain.
    pub async fn create_relations(&self, drafts: Vec<RelationDraft>) -> Result<Vec<Relation>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        for draft in &drafts {
            draft.validate()?;
        }

        let _write = self.write_lock.lock();
        let now = now_ms();

        let mut endpoint_ids: HashMap<String, RowId> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        for draft in &drafts {
            for name in [&draft.from, &draft.to] {
                if endpoint_ids.contains_key(name.as_str()) || missing.contains(name) {
                    continue;
                }
                match self.backend.current_entity(name)? {
                    Some(entity) => {
                        endpoint_ids.insert(name.clone(), entity.version_info.id);
                    }
                    None => missing.push(name.clone()),
                }
            }
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(GraphError::MissingEndpoints(missing));
        }

        let mut writes = WriteSet::new();
        let mut created = Vec::new();
        let mut batch_keys: HashSet<RelationKey> = HashSet::new();
        for draft in drafts {
            let key = draft.key();
            if !batch_keys.insert(key.clone()) {
                log::debug!("Skipping duplicate relation in batch: {}", key);
                continue;
            }
            if self.backend.current_relation(&key)?.is_some() {
                log::debug!("Relation already exists, skipping: {}", key);
                continue;
            }
            let prior = self
                .backend
                .relation_history(&key)?
                .pop()
                .map(|row| row.version_info);
            let mut metadata = draft.metadata;
            metadata.insert("createdAt".to_string(), Value::from(now));
            metadata.insert("updatedAt".to_string(), Value::from(now));
            let relation = Relation {
                from_id: endpoint_ids[&draft.from],
                to_id: endpoint_ids[&draft.to],
                from: draft.from,
                to: draft.to,
                relation_type: draft.relation_type,
                strength: draft.strength,
                confidence: draft.confidence,
                metadata,
                version_info: match prior {
                    Some(prior) => prior.successor(now, draft.changed_by),
                    None => VersionInfo::initial(now, draft.changed_by),
                },
            };
            writes.insert_relation(relation.clone());
            created.push(relation);
        }

        if !writes.is_empty() {
            self.backend.apply(writes)?;
        }
        log::debug!("Created {} relations", created.len());
        Ok(created)
    }

    /// Append observations, stepping each touched entity to a new version
    ///
    /// Contents already present on the entity are dropped. An entity with
    /// nothing new to add keeps its current version. Unknown entity names
    /// are reported back with an empty `added` list instead of failing the
    /// rest of the batch.
    pub async fn add_observations(
        &self,
        additions: Vec<ObservationAdd>,
    ) -> Result<Vec<ObservationAddResult>> {
        for addition in &additions {
            if let Some(embeddings) = &addition.embeddings {
                if embeddings.len() != addition.contents.len() {
                    return Err(GraphError::validation(format!(
                        "{} embeddings for {} observations on {}",
                        embeddings.len(),
                        addition.contents.len(),
                        addition.entity_name
                    )));
                }
            }
        }
        let mut normalized: Vec<Option<Vec<Vec<f32>>>> = Vec::with_capacity(additions.len());
        for addition in &additions {
            normalized.push(match &addition.embeddings {
                Some(vectors) => {
                    let mut out = Vec::with_capacity(vectors.len());
                    for vector in vectors {
                        out.push(self.index.normalize(vector)?);
                    }
                    Some(out)
                }
                None => None,
            });
        }

        let _write = self.write_lock.lock();
        let now = now_ms();
        let mut results = Vec::with_capacity(additions.len());

        for (addition, vectors) in additions.into_iter().zip(normalized) {
            let current = match self.backend.current_entity(&addition.entity_name)? {
                Some(entity) => entity,
                None => {
                    log::warn!("add_observations: unknown entity {}", addition.entity_name);
                    results.push(ObservationAddResult {
                        entity_name: addition.entity_name,
                        added: Vec::new(),
                    });
                    continue;
                }
            };

            let mut next_observations = current.observations.clone();
            let mut added = Vec::new();
            // (slot, index into contents) for each observation that is new
            let mut slots: Vec<(u32, usize)> = Vec::new();
            for (i, content) in addition.contents.iter().enumerate() {
                if next_observations.contains(content) {
                    continue;
                }
                slots.push((next_observations.len() as u32, i));
                next_observations.push(content.clone());
                added.push(content.clone());
            }

            if added.is_empty() {
                results.push(ObservationAddResult {
                    entity_name: addition.entity_name,
                    added,
                });
                continue;
            }

            let successor = Entity {
                name: current.name.clone(),
                entity_type: current.entity_type,
                observations: next_observations,
                version_info: current.version_info.successor(now, addition.changed_by.clone()),
            };

            let mut writes = WriteSet::new();
            writes.close_entity(current.name.clone(), current.version_info.id, now);
            writes.insert_entity(successor);
            let mut index_updates: Vec<(VectorKey, Vec<f32>)> = Vec::new();
            if let Some(vectors) = vectors {
                for (slot, i) in slots {
                    let key = VectorKey::new(current.name.clone(), slot);
                    writes.put_embedding(key.clone(), vectors[i].clone());
                    index_updates.push((key, vectors[i].clone()));
                }
            }
            self.backend.apply(writes)?;
            for (key, vector) in index_updates {
                if let Err(e) = self.index.upsert(key, &vector) {
                    log::warn!("Vector index update failed: {}", e);
                }
            }
            results.push(ObservationAddResult {
                entity_name: addition.entity_name,
                added,
            });
        }
        Ok(results)
    }

    /// Remove observations, stepping each touched entity to a new version
    ///
    /// Entities that end up unchanged keep their current version. Unknown
    /// entity names are skipped.
    pub async fn delete_observations(&self, deletions: Vec<ObservationDelete>) -> Result<()> {
        let _write = self.write_lock.lock();
        let now = now_ms();

        for deletion in deletions {
            let current = match self.backend.current_entity(&deletion.entity_name)? {
                Some(entity) => entity,
                None => {
                    log::warn!("delete_observations: unknown entity {}", deletion.entity_name);
                    continue;
                }
            };
            let remaining: Vec<String> = current
                .observations
                .iter()
                .filter(|observation| !deletion.observations.contains(observation))
                .cloned()
                .collect();
            if remaining.len() == current.observations.len() {
                continue;
            }

            let successor = Entity {
                name: current.name.clone(),
                entity_type: current.entity_type,
                observations: remaining,
                version_info: current.version_info.successor(now, deletion.changed_by),
            };
            let mut writes = WriteSet::new();
            writes.close_entity(current.name.clone(), current.version_info.id, now);
            writes.insert_entity(successor);
            self.backend.apply(writes)?;
        }
        Ok(())
    }

    /// Close entities and cascade over their relations and embeddings
    ///
    /// Closing an entity also closes every current relation touching it, all
    /// in one atomic write set across the whole batch, so history keeps the
    /// closed rows. Names without a current version are skipped.
    pub async fn delete_entities(&self, names: Vec<String>) -> Result<()> {
        let _write = self.write_lock.lock();
        let now = now_ms();

        let mut writes = WriteSet::new();
        let mut removed: Vec<String> = Vec::new();
        let mut closed_relations: HashSet<RelationKey> = HashSet::new();
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name.clone()) {
                continue;
            }
            let current = match self.backend.current_entity(&name)? {
                Some(entity) => entity,
                None => {
                    log::debug!("delete_entities: no current entity {}", name);
                    continue;
                }
            };
            writes.close_entity(name.clone(), current.version_info.id, now);
            for relation in self.backend.relations_touching(&name)? {
                let key = relation.key();
                // Both endpoints may be in the batch; close each edge once
                if closed_relations.insert(key.clone()) {
                    writes.close_relation(key, relation.version_info.id, now);
                }
            }
            writes.remove_embeddings(name.clone());
            removed.push(name);
        }

        if writes.is_empty() {
            return Ok(());
        }
        self.backend.apply(writes)?;
        for name in &removed {
            self.index.remove_entity(name);
        }
        log::debug!(
            "Deleted {} entities, closed {} relations",
            removed.len(),
            closed_relations.len()
        );
        Ok(())
    }

    /// Close relations; keys without a current version are skipped
    pub async fn delete_relations(&self, keys: Vec<RelationKey>) -> Result<()> {
        let _write = self.write_lock.lock();
        let now = now_ms();

        let mut writes = WriteSet::new();
        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            match self.backend.current_relation(&key)? {
                Some(relation) => writes.close_relation(key, relation.version_info.id, now),
                None => log::debug!("delete_relations: no current relation {}", key),
            }
        }
        if !writes.is_empty() {
            self.backend.apply(writes)?;
        }
        Ok(())
    }

    /// Step a relation to a new version with updated attributes
    ///
    /// Provided fields replace the current ones; omitted fields carry over.
    /// A metadata replacement keeps the original `createdAt` stamp. The new
    /// version restarts the confidence decay clock.
    pub async fn update_relation(&self, update: RelationUpdate) -> Result<Relation> {
        update.validate()?;

        let _write = self.write_lock.lock();
        let now = now_ms();
        let key = update.key();
        let current = self
            .backend
            .current_relation(&key)?
            .ok_or_else(|| GraphError::not_found(key.to_string()))?;

        let mut metadata = update.metadata.unwrap_or_else(|| current.metadata.clone());
        if let Some(created) = current.metadata.get("createdAt") {
            metadata.insert("createdAt".to_string(), created.clone());
        }
        metadata.insert("updatedAt".to_string(), Value::from(now));

        let successor = Relation {
            from: current.from.clone(),
            to: current.to.clone(),
            from_id: current.from_id,
            to_id: current.to_id,
            relation_type: current.relation_type,
            strength: update.strength.or(current.strength),
            confidence: update.confidence.or(current.confidence),
            metadata,
            version_info: current.version_info.successor(now, update.changed_by),
        };

        let mut writes = WriteSet::new();
        writes.close_relation(key, current.version_info.id, now);
        writes.insert_relation(successor.clone());
        self.backend.apply(writes)?;
        Ok(successor)
    }

    /// Current version of the named entity
    pub async fn get_entity(&self, name: &str) -> Result<Entity> {
        self.backend
            .current_entity(name)?
            .ok_or_else(|| GraphError::not_found(format!("entity {}", name)))
    }

    /// Current version of the keyed relation
    pub async fn get_relation(&self, key: &RelationKey) -> Result<Relation> {
        self.backend
            .current_relation(key)?
            .ok_or_else(|| GraphError::not_found(key.to_string()))
    }

    /// Every version of the named entity, oldest first
    pub async fn get_entity_history(&self, name: &str) -> Result<Vec<Entity>> {
        self.backend.entity_history(name)
    }

    /// Every version of the keyed relation, oldest first
    pub async fn get_relation_history(&self, key: &RelationKey) -> Result<Vec<Relation>> {
        self.backend.relation_history(key)
    }

    /// The graph as it stood at `at`: every row whose validity window
    /// covered that instant
    pub async fn get_graph_at_time(&self, at: TimestampMs) -> Result<KnowledgeGraph> {
        Ok(KnowledgeGraph {
            entities: self.backend.entities_at(at)?,
            relations: self.backend.relations_at(at)?,
        })
    }

    /// The current graph
    pub async fn load_graph(&self) -> Result<KnowledgeGraph> {
        Ok(KnowledgeGraph {
            entities: self.backend.current_entities()?,
            relations: self.backend.current_relations()?,
        })
    }

    /// The current graph with confidence decay projected onto relations
    ///
    /// Stored rows are left untouched; decay only shapes what this read
    /// returns.
    pub async fn get_decayed_graph(&self) -> Result<KnowledgeGraph> {
        let now = now_ms();
        let mut graph = self.load_graph().await?;
        for relation in &mut graph.relations {
            self.decay.apply(relation, now);
        }
        Ok(graph)
    }

    /// Keyword search over entity names and observations
    ///
    /// Returns matching entities plus the relations whose endpoints both
    /// matched.
    pub async fn search_nodes(&self, query: &str, options: &SearchOptions) -> Result<KnowledgeGraph> {
        let lowered = query.to_lowercase();
        let limit = options.limit.unwrap_or(usize::MAX);

        let mut entities: Vec<Entity> = self
            .backend
            .current_entities()?
            .into_iter()
            .filter(|entity| {
                options
                    .entity_type
                    .map_or(true, |wanted| entity.entity_type == wanted)
            })
            .filter(|entity| entity.matches_query(&lowered))
            .collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        entities.truncate(limit);

        let names: HashSet<&str> = entities.iter().map(|entity| entity.name.as_str()).collect();
        let relations = self
            .backend
            .current_relations()?
            .into_iter()
            .filter(|relation| {
                names.contains(relation.from.as_str()) && names.contains(relation.to.as_str())
            })
            .collect();

        Ok(KnowledgeGraph { entities, relations })
    }

    /// Semantic search over stored embeddings
    ///
    /// The query is embedded by the attached provider and matched against
    /// the vector index. Without a provider, or when embedding fails or
    /// nothing clears the similarity floor, the query falls back to keyword
    /// search; fallback hits carry similarity 0.0 and are not filtered by
    /// `min_similarity`. Rankings are cached, but entities are always
    /// re-read from committed rows, so deleted entities drop out of cached
    /// results immediately.
    pub async fn semantic_search(
        &self,
        query: &str,
        options: &SemanticSearchOptions,
    ) -> Result<Vec<SemanticHit>> {
        let cache_key = CacheKey::new(
            query,
            &[
                ("limit", options.limit.to_string()),
                ("min_similarity", format!("{:.4}", options.min_similarity)),
            ],
        );
        if let Some(cached) = self.search_cache.get(&cache_key) {
            return self.hydrate(cached.0);
        }

        let mut raw: Vec<RawHit> = Vec::new();
        match &self.embedder {
            None => log::debug!("semantic_search: no embedding provider, using keyword match"),
            Some(embedder) => match embedder.embed(query).await {
                Err(e) => log::warn!("Query embedding failed, using keyword match: {}", e),
                Ok(vector) => match self.index.search(&vector, options.limit, options.min_similarity)
                {
                    Err(e) => log::warn!("Vector search failed, using keyword match: {}", e),
                    Ok(hits) => {
                        raw = hits
                            .into_iter()
                            .map(|hit| RawHit {
                                entity: hit.entity,
                                slot: hit.slot,
                                similarity: hit.similarity,
                                origin: MatchOrigin::Semantic,
                            })
                            .collect();
                    }
                },
            },
        }

        if raw.is_empty() {
            let keyword = self
                .search_nodes(
                    query,
                    &SearchOptions {
                        entity_type: None,
                        limit: Some(options.limit),
                    },
                )
                .await?;
            raw = keyword
                .entities
                .into_iter()
                .map(|entity| RawHit {
                    entity: entity.name,
                    slot: 0,
                    similarity: 0.0,
                    origin: MatchOrigin::Keyword,
                })
                .collect();
        }

        self.search_cache.set(cache_key, CachedHits(raw.clone()));
        self.hydrate(raw)
    }

    fn hydrate(&self, raw: Vec<RawHit>) -> Result<Vec<SemanticHit>> {
        let mut hits = Vec::with_capacity(raw.len());
        for hit in raw {
            if let Some(entity) = self.backend.current_entity(&hit.entity)? {
                hits.push(SemanticHit {
                    entity,
                    similarity: hit.similarity,
                    origin: hit.origin,
                });
            }
        }
        Ok(hits)
    }

    /// Breadth-first traversal from `start` over current relations
    ///
    /// An unknown start yields an empty result. Reported relations are the
    /// edges of the reached subgraph, including edges between nodes found
    /// on different paths.
    pub async fn traverse(&self, start: &str, options: &TraversalOptions) -> Result<TraversalResult> {
        if self.backend.current_entity(start)?.is_none() {
            return Ok(TraversalResult::default());
        }

        let relations = self.backend.current_relations()?;
        let (order, induced) = bfs(start, &relations, options);

        let mut nodes = Vec::with_capacity(order.len());
        for (name, depth) in order {
            if let Some(entity) = self.backend.current_entity(&name)? {
                nodes.push(TraversalNode { entity, depth });
            }
        }
        let induced_relations = induced
            .into_iter()
            .map(|i| relations[i].clone())
            .collect();

        Ok(TraversalResult {
            nodes,
            relations: induced_relations,
        })
    }

    /// Replace the whole store with `graph`
    ///
    /// Existing rows, history, embeddings, the index, and cached searches
    /// are all dropped. The snapshot is validated first; imported rows are
    /// re-minted as version 1 with fresh ids, keeping each row's original
    /// `created_at` stamp when it carries one.
    pub async fn save_graph(&self, graph: KnowledgeGraph) -> Result<()> {
        let mut names = HashSet::new();
        for entity in &graph.entities {
            validate_name(&entity.name)?;
            if !names.insert(entity.name.clone()) {
                return Err(GraphError::validation(format!(
                    "duplicate entity in snapshot: {}",
                    entity.name
                )));
            }
        }
        let mut keys = HashSet::new();
        let mut missing: Vec<String> = Vec::new();
        for relation in &graph.relations {
            validate_unit_interval("strength", relation.strength)?;
            validate_unit_interval("confidence", relation.confidence)?;
            if !keys.insert(relation.key()) {
                return Err(GraphError::validation(format!(
                    "duplicate relation in snapshot: {}",
                    relation.key()
                )));
            }
            for name in [&relation.from, &relation.to] {
                if !names.contains(name.as_str()) && !missing.contains(name) {
                    missing.push(name.clone());
                }
            }
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(GraphError::MissingEndpoints(missing));
        }

        let _write = self.write_lock.lock();
        let now = now_ms();

        self.backend.clear()?;
        self.index.clear();
        self.search_cache.clear();

        let mut writes = WriteSet::new();
        let mut entity_ids: HashMap<String, RowId> = HashMap::new();
        for entity in graph.entities {
            let mut info = VersionInfo::initial(now, entity.version_info.changed_by.clone());
            if entity.version_info.created_at > 0 {
                info.created_at = entity.version_info.created_at;
            }
            entity_ids.insert(entity.name.clone(), info.id);
            writes.insert_entity(Entity {
                name: entity.name,
                entity_type: entity.entity_type,
                observations: entity.observations,
                version_info: info,
            });
        }
        for relation in graph.relations {
            let mut info = VersionInfo::initial(now, relation.version_info.changed_by.clone());
            if relation.version_info.created_at > 0 {
                info.created_at = relation.version_info.created_at;
            }
            writes.insert_relation(Relation {
                from_id: entity_ids[&relation.from],
                to_id: entity_ids[&relation.to],
                from: relation.from,
                to: relation.to,
                relation_type: relation.relation_type,
                strength: relation.strength,
                confidence: relation.confidence,
                metadata: relation.metadata,
                version_info: info,
            });
        }
        let total = writes.len();
        self.backend.apply(writes)?;
        log::info!("Imported graph snapshot: {} rows", total);
        Ok(())
    }

    /// Store an embedding for one observation slot of an entity
    ///
    /// Slot `n` embeds the entity's `n`-th observation; slot 0 doubles as
    /// the entity-level vector and is accepted even when the entity has no
    /// observations.
    pub async fn put_observation_embedding(
        &self,
        entity: &str,
        slot: u32,
        vector: &[f32],
    ) -> Result<()> {
        let normalized = self.index.normalize(vector)?;

        let _write = self.write_lock.lock();
        let current = self
            .backend
            .current_entity(entity)?
            .ok_or_else(|| GraphError::not_found(format!("entity {}", entity)))?;
        if slot != 0 && (slot as usize) >= current.observations.len() {
            return Err(GraphError::validation(format!(
                "entity {} has no observation slot {}",
                entity, slot
            )));
        }

        let key = VectorKey::new(entity, slot);
        let mut writes = WriteSet::new();
        writes.put_embedding(key.clone(), normalized.clone());
        self.backend.apply(writes)?;
        if let Err(e) = self.index.upsert(key, &normalized) {
            log::warn!("Vector index update failed: {}", e);
        }
        Ok(())
    }

    /// Rebuild the approximate index over the current vector set
    pub async fn refresh_index(&self) -> Result<()> {
        self.index.refresh().await
    }

    /// Wait until searches run at full speed, up to `timeout`
    pub async fn wait_index_ready(&self, timeout: Duration) -> Result<()> {
        self.index.wait_ready(timeout).await
    }

    /// Drop expired search cache entries, returning how many were removed
    pub fn sweep_expired_cache(&self) -> usize {
        self.search_cache.sweep_expired()
    }

    /// Counts and health of the store, index, and cache
    pub async fn stats(&self) -> Result<StoreStats> {
        let entities = self.backend.current_entities()?;
        let relations = self.backend.current_relations()?;

        let mut entities_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for entity in &entities {
            *entities_by_type
                .entry(entity.entity_type.to_string())
                .or_insert(0) += 1;
        }
        let mut relations_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for relation in &relations {
            *relations_by_type
                .entry(relation.relation_type.to_string())
                .or_insert(0) += 1;
        }

        Ok(StoreStats {
            entities: entities.len(),
            relations: relations.len(),
            entities_by_type,
            relations_by_type,
            index: self.index.stats(),
            cache: self.search_cache.stats(),
        })
    }
}
