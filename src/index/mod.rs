//! Vector similarity index
//!
//! Stores one unit vector per `(entity, observation slot)` key and answers
//! cosine similarity queries with scores mapped onto `[0, 1]`. An HNSW
//! layer accelerates large indexes but is only rebuilt when a caller drives
//! [`VectorIndex::refresh`]; between refreshes, searches run as an exact
//! linear scan, so results never reflect a stale approximate layer.

mod ann;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{GraphError, Result};

use ann::{AnnIndex, IndexPoint};

/// Dot product of two equal-length vectors
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Index sizing and build knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    /// Required dimensionality of every stored and queried vector
    pub dimension: usize,

    /// Entry count below which searches stay linear and no HNSW is built
    pub ann_threshold: usize,

    /// HNSW construction beam width
    pub ef_construction: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            ann_threshold: 64,
            ef_construction: 100,
        }
    }
}

/// Key of a stored vector: an entity plus the observation slot it embeds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorKey {
    pub entity: String,
    pub slot: u32,
}

impl VectorKey {
    pub fn new(entity: impl Into<String>, slot: u32) -> Self {
        Self {
            entity: entity.into(),
            slot,
        }
    }
}

/// One semantic search match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    /// Entity that owns the matched vector
    pub entity: String,

    /// Observation slot of the best-matching vector for that entity
    pub slot: u32,

    /// Cosine similarity mapped onto `[0, 1]`
    pub similarity: f32,
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub entries: usize,
    pub dimension: usize,
    /// Entries covered by the HNSW layer at its last build
    pub ann_entries: usize,
    /// Whether searches are currently served at full speed
    pub ready: bool,
}

struct VectorEntry {
    key: VectorKey,
    vector: Vec<f32>,
}

struct IndexInner {
    entries: Vec<VectorEntry>,
    by_key: HashMap<VectorKey, usize>,
    /// Bumped on every mutation; the HNSW layer is trusted only while
    /// `ann_revision` matches.
    revision: u64,
    ann: Option<AnnIndex>,
    ann_revision: u64,
}

/// In-memory vector index with caller-driven HNSW refresh
pub struct VectorIndex {
    config: VectorIndexConfig,
    inner: RwLock<IndexInner>,
    ready_tx: watch::Sender<u64>,
    ready_rx: watch::Receiver<u64>,
}

impl VectorIndex {
    /// Create an empty index
    pub fn new(config: VectorIndexConfig) -> Self {
        let (ready_tx, ready_rx) = watch::channel(0);
        Self {
            config,
            inner: RwLock::new(IndexInner {
                entries: Vec::new(),
                by_key: HashMap::new(),
                revision: 0,
                ann: None,
                ann_revision: 0,
            }),
            ready_tx,
            ready_rx,
        }
    }

    pub fn config(&self) -> &VectorIndexConfig {
        &self.config
    }

    /// Validate a vector and scale it to unit length
    ///
    /// Rejects dimension mismatches, non-finite components, and zero-norm
    /// vectors, all before anything is stored.
    pub fn normalize(&self, vector: &[f32]) -> Result<Vec<f32>> {
        if vector.len() != self.config.dimension {
            return Err(GraphError::validation(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.config.dimension
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(GraphError::validation(
                "vector contains a non-finite component",
            ));
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(GraphError::validation("vector has zero magnitude"));
        }
        Ok(vector.iter().map(|v| v / norm).collect())
    }

    /// Insert or replace the vector stored under `key`
    pub fn upsert(&self, key: VectorKey, vector: &[f32]) -> Result<()> {
        let vector = self.normalize(vector)?;
        let mut inner = self.inner.write();
        let entry = VectorEntry {
            key: key.clone(),
            vector,
        };

        match inner.by_key.get(&key).copied() {
            Some(slot) => inner.entries[slot] = entry,
            None => {
                let slot = inner.entries.len();
                inner.entries.push(entry);
                inner.by_key.insert(key, slot);
            }
        }
        inner.revision += 1;
        Ok(())
    }

    /// Remove every vector owned by `entity`, returning how many were dropped
    pub fn remove_entity(&self, entity: &str) -> usize {
        let mut inner = self.inner.write();
        let doomed: Vec<VectorKey> = inner
            .by_key
            .keys()
            .filter(|key| key.entity == entity)
            .cloned()
            .collect();

        for key in &doomed {
            if let Some(slot) = inner.by_key.remove(key) {
                inner.entries.swap_remove(slot);
                if slot < inner.entries.len() {
                    let moved = inner.entries[slot].key.clone();
                    inner.by_key.insert(moved, slot);
                }
            }
        }

        if !doomed.is_empty() {
            inner.revision += 1;
        }
        doomed.len()
    }

    /// Drop every vector
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        if inner.entries.is_empty() {
            return;
        }
        inner.entries.clear();
        inner.by_key.clear();
        inner.ann = None;
        inner.revision += 1;
        inner.ann_revision = inner.revision;
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether searches are currently served at full speed
    ///
    /// True when the HNSW layer matches the latest write, or when the index
    /// is small enough that the exact linear path is the intended one.
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.read();
        inner.entries.len() < self.config.ann_threshold || inner.ann_revision == inner.revision
    }

    /// Search for the entities most similar to `query`
    ///
    /// Results are deduplicated per entity (best slot wins), filtered by
    /// `min_similarity`, and sorted best first. An empty index returns an
    /// empty result rather than an error.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<SimilarityHit>> {
        let query = self.normalize(query)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read();
        if inner.entries.is_empty() {
            return Ok(Vec::new());
        }

        let ann_fresh = inner.ann_revision == inner.revision;
        let candidates: Vec<(usize, f32)> = match (&inner.ann, ann_fresh) {
            (Some(ann), true) => {
                let point = IndexPoint {
                    vector: query.clone(),
                };
                // Overfetch so per-entity dedupe and the similarity floor
                // still leave enough survivors.
                ann.search(&point, limit.saturating_mul(4))
            }
            _ => inner
                .entries
                .iter()
                .enumerate()
                .map(|(slot, entry)| (slot, dot(&query, &entry.vector)))
                .collect(),
        };

        let mut best: HashMap<&str, (usize, f32)> = HashMap::new();
        for (slot, raw) in candidates {
            let Some(entry) = inner.entries.get(slot) else {
                continue;
            };
            let current = best.entry(entry.key.entity.as_str()).or_insert((slot, raw));
            if raw > current.1 {
                *current = (slot, raw);
            }
        }

        let mut hits: Vec<SimilarityHit> = best
            .into_iter()
            .map(|(entity, (slot, raw))| SimilarityHit {
                entity: entity.to_string(),
                slot: inner.entries[slot].key.slot,
                similarity: ((raw + 1.0) / 2.0).clamp(0.0, 1.0),
            })
            .filter(|hit| hit.similarity >= min_similarity)
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity.cmp(&b.entity))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Rebuild the HNSW layer from the current entries
    ///
    /// The build runs on the blocking pool; writes arriving while it runs
    /// leave the new layer stale, and searches keep using the linear path
    /// until a later refresh catches up.
    pub async fn refresh(&self) -> Result<()> {
        let (points, values, revision) = {
            let inner = self.inner.read();
            if inner.entries.len() < self.config.ann_threshold {
                drop(inner);
                let mut inner = self.inner.write();
                inner.ann = None;
                inner.ann_revision = inner.revision;
                let revision = inner.revision;
                drop(inner);
                let _ = self.ready_tx.send(revision);
                return Ok(());
            }
            let points: Vec<IndexPoint> = inner
                .entries
                .iter()
                .map(|entry| IndexPoint {
                    vector: entry.vector.clone(),
                })
                .collect();
            let values: Vec<usize> = (0..inner.entries.len()).collect();
            (points, values, inner.revision)
        };

        let ef_construction = self.config.ef_construction;
        let count = points.len();
        let built = tokio::task::spawn_blocking(move || {
            AnnIndex::build(points, values, ef_construction)
        })
        .await
        .map_err(|e| GraphError::backend(format!("HNSW build task failed: {e}")))?;

        let mut inner = self.inner.write();
        inner.ann = Some(built);
        inner.ann_revision = revision;
        let caught_up = inner.revision == revision;
        drop(inner);

        if caught_up {
            log::debug!("HNSW layer rebuilt over {count} vectors");
        } else {
            log::debug!("HNSW layer rebuilt over {count} vectors but writes raced past it");
        }
        let _ = self.ready_tx.send(revision);
        Ok(())
    }

    /// Wait until the index is ready or the timeout elapses
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let mut rx = self.ready_rx.clone();
        let wait = async {
            loop {
                if self.is_ready() {
                    return Ok(());
                }
                rx.changed()
                    .await
                    .map_err(|_| GraphError::backend("index readiness channel closed"))?;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(GraphError::timed_out(format!(
                "vector index readiness after {timeout:?}"
            ))),
        }
    }

    /// Current index statistics
    pub fn stats(&self) -> IndexStats {
        let inner = self.inner.read();
        IndexStats {
            entries: inner.entries.len(),
            dimension: self.config.dimension,
            ann_entries: inner.ann.as_ref().map(AnnIndex::len).unwrap_or(0),
            ready: inner.entries.len() < self.config.ann_threshold
                || inner.ann_revision == inner.revision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(dimension: usize) -> VectorIndex {
        VectorIndex::new(VectorIndexConfig {
            dimension,
            ann_threshold: 64,
            ef_construction: 100,
        })
    }

    #[test]
    fn test_upsert_and_len() {
        let idx = index(3);
        idx.upsert(VectorKey::new("a", 0), &[1.0, 0.0, 0.0]).unwrap();
        idx.upsert(VectorKey::new("b", 0), &[0.0, 1.0, 0.0]).unwrap();
        assert_eq!(idx.len(), 2);

        // Replacing does not grow the index
        idx.upsert(VectorKey::new("a", 0), &[0.0, 0.0, 1.0]).unwrap();
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let idx = index(3);
        let err = idx.upsert(VectorKey::new("a", 0), &[1.0, 0.0]);
        assert!(matches!(err, Err(GraphError::Validation(_))));
        assert!(idx.is_empty());
    }

    #[test]
    fn test_non_finite_rejected() {
        let idx = index(3);
        assert!(idx.upsert(VectorKey::new("a", 0), &[f32::NAN, 0.0, 0.0]).is_err());
        assert!(idx
            .upsert(VectorKey::new("a", 0), &[f32::INFINITY, 0.0, 0.0])
            .is_err());
    }

    #[test]
    fn test_zero_vector_rejected() {
        let idx = index(3);
        assert!(idx.upsert(VectorKey::new("a", 0), &[0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_normalize_produces_unit_vector() {
        let idx = index(3);
        let v = idx.normalize(&[3.0, 4.0, 0.0]).unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_search_identity_scores_one() {
        let idx = index(3);
        idx.upsert(VectorKey::new("a", 0), &[1.0, 0.0, 0.0]).unwrap();
        idx.upsert(VectorKey::new("b", 0), &[0.0, 1.0, 0.0]).unwrap();

        let hits = idx.search(&[1.0, 0.0, 0.0], 10, 0.0).unwrap();
        assert_eq!(hits[0].entity, "a");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_search_similarity_is_unit_interval() {
        let idx = index(3);
        idx.upsert(VectorKey::new("same", 0), &[1.0, 0.0, 0.0]).unwrap();
        idx.upsert(VectorKey::new("orthogonal", 0), &[0.0, 1.0, 0.0])
            .unwrap();
        idx.upsert(VectorKey::new("opposite", 0), &[-1.0, 0.0, 0.0])
            .unwrap();

        let hits = idx.search(&[1.0, 0.0, 0.0], 10, 0.0).unwrap();
        let by_name: HashMap<&str, f32> = hits
            .iter()
            .map(|h| (h.entity.as_str(), h.similarity))
            .collect();

        assert!((by_name["same"] - 1.0).abs() < 1e-5);
        assert!((by_name["orthogonal"] - 0.5).abs() < 1e-5);
        assert!(by_name["opposite"].abs() < 1e-5);
        for hit in &hits {
            assert!((0.0..=1.0).contains(&hit.similarity));
        }
    }

    #[test]
    fn test_min_similarity_filters() {
        let idx = index(3);
        idx.upsert(VectorKey::new("close", 0), &[1.0, 0.1, 0.0]).unwrap();
        idx.upsert(VectorKey::new("far", 0), &[-1.0, 0.0, 0.0]).unwrap();

        let hits = idx.search(&[1.0, 0.0, 0.0], 10, 0.8).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity, "close");
    }

    #[test]
    fn test_search_dedupes_per_entity() {
        let idx = index(3);
        idx.upsert(VectorKey::new("a", 0), &[0.0, 1.0, 0.0]).unwrap();
        idx.upsert(VectorKey::new("a", 1), &[1.0, 0.0, 0.0]).unwrap();

        let hits = idx.search(&[1.0, 0.0, 0.0], 10, 0.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity, "a");
        // The closer slot wins
        assert_eq!(hits[0].slot, 1);
    }

    #[test]
    fn test_search_empty_index_returns_empty() {
        let idx = index(3);
        assert!(idx.search(&[1.0, 0.0, 0.0], 10, 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_search_rejects_bad_query() {
        let idx = index(3);
        idx.upsert(VectorKey::new("a", 0), &[1.0, 0.0, 0.0]).unwrap();
        assert!(idx.search(&[1.0, 0.0], 10, 0.0).is_err());
        assert!(idx.search(&[0.0, 0.0, 0.0], 10, 0.0).is_err());
    }

    #[test]
    fn test_remove_entity() {
        let idx = index(3);
        idx.upsert(VectorKey::new("a", 0), &[1.0, 0.0, 0.0]).unwrap();
        idx.upsert(VectorKey::new("a", 1), &[0.0, 1.0, 0.0]).unwrap();
        idx.upsert(VectorKey::new("b", 0), &[0.0, 0.0, 1.0]).unwrap();

        assert_eq!(idx.remove_entity("a"), 2);
        assert_eq!(idx.len(), 1);

        let hits = idx.search(&[1.0, 0.0, 0.0], 10, 0.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity, "b");

        assert_eq!(idx.remove_entity("a"), 0);
    }

    #[test]
    fn test_clear() {
        let idx = index(3);
        idx.upsert(VectorKey::new("a", 0), &[1.0, 0.0, 0.0]).unwrap();
        idx.clear();
        assert!(idx.is_empty());
        assert!(idx.is_ready());
    }

    #[tokio::test]
    async fn test_small_index_is_ready_without_refresh() {
        let idx = index(3);
        idx.upsert(VectorKey::new("a", 0), &[1.0, 0.0, 0.0]).unwrap();
        assert!(idx.is_ready());
        idx.wait_ready(Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_builds_ann_above_threshold() {
        let idx = VectorIndex::new(VectorIndexConfig {
            dimension: 4,
            ann_threshold: 8,
            ef_construction: 100,
        });

        for i in 0..32 {
            let angle = i as f32 * 0.1;
            idx.upsert(
                VectorKey::new(format!("e{i}"), 0),
                &[angle.cos(), angle.sin(), 0.5, 0.1],
            )
            .unwrap();
        }

        assert!(!idx.is_ready());
        idx.refresh().await.unwrap();
        assert!(idx.is_ready());
        assert_eq!(idx.stats().ann_entries, 32);

        // ANN path and linear path agree on the best hit
        let query = [1.0, 0.0, 0.5, 0.1];
        let hits = idx.search(&query, 3, 0.0).unwrap();
        assert_eq!(hits[0].entity, "e0");
    }

    #[tokio::test]
    async fn test_write_after_refresh_falls_back_to_linear() {
        let idx = VectorIndex::new(VectorIndexConfig {
            dimension: 3,
            ann_threshold: 2,
            ef_construction: 100,
        });

        idx.upsert(VectorKey::new("a", 0), &[1.0, 0.0, 0.0]).unwrap();
        idx.upsert(VectorKey::new("b", 0), &[0.0, 1.0, 0.0]).unwrap();
        idx.refresh().await.unwrap();
        assert!(idx.is_ready());

        // A write makes the ANN stale; the fresh entry must still be found
        idx.upsert(VectorKey::new("c", 0), &[0.99, 0.1, 0.0]).unwrap();
        assert!(!idx.is_ready());

        let hits = idx.search(&[1.0, 0.0, 0.0], 2, 0.0).unwrap();
        assert_eq!(hits[0].entity, "a");
        assert_eq!(hits[1].entity, "c");
    }

    #[tokio::test]
    async fn test_wait_ready_times_out_without_refresh() {
        let idx = VectorIndex::new(VectorIndexConfig {
            dimension: 3,
            ann_threshold: 1,
            ef_construction: 100,
        });
        idx.upsert(VectorKey::new("a", 0), &[1.0, 0.0, 0.0]).unwrap();

        let err = idx.wait_ready(Duration::from_millis(20)).await;
        assert!(matches!(err, Err(GraphError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_wait_ready_wakes_on_refresh() {
        use std::sync::Arc;

        let idx = Arc::new(VectorIndex::new(VectorIndexConfig {
            dimension: 3,
            ann_threshold: 1,
            ef_construction: 100,
        }));
        idx.upsert(VectorKey::new("a", 0), &[1.0, 0.0, 0.0]).unwrap();
        assert!(!idx.is_ready());

        let waiter = {
            let idx = Arc::clone(&idx);
            tokio::spawn(async move { idx.wait_ready(Duration::from_secs(5)).await })
        };

        idx.refresh().await.unwrap();
        waiter.await.unwrap().unwrap();
    }
}
