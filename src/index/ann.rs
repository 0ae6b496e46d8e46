//! HNSW approximate layer
//!
//! Thin wrapper over instant-distance. Points are unit vectors, so cosine
//! distance reduces to `1 - dot`, and the similarity of a candidate can be
//! recovered from its distance without touching the vector again.

use instant_distance::{Builder, HnswMap, Point, Search};

/// HNSW point wrapper for semantic search
#[derive(Clone)]
pub(crate) struct IndexPoint {
    pub vector: Vec<f32>,
}

impl Point for IndexPoint {
    fn distance(&self, other: &Self) -> f32 {
        // Cosine distance = 1 - similarity (HNSW finds minimum)
        1.0 - super::dot(&self.vector, &other.vector)
    }
}

/// Immutable HNSW snapshot mapping points to entry slots
pub(crate) struct AnnIndex {
    hnsw: HnswMap<IndexPoint, usize>,
    len: usize,
}

impl AnnIndex {
    /// Build an index over `points`; `values[i]` is the entry slot of
    /// `points[i]` in the snapshot the index was built from.
    pub fn build(points: Vec<IndexPoint>, values: Vec<usize>, ef_construction: usize) -> Self {
        let len = points.len();
        let hnsw = Builder::default()
            .ef_construction(ef_construction)
            .build(points, values);
        Self { hnsw, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Nearest entry slots with their dot-product similarity, best first
    pub fn search(&self, query: &IndexPoint, limit: usize) -> Vec<(usize, f32)> {
        let mut search = Search::default();
        let mut results = Vec::new();

        for candidate in self.hnsw.search(query, &mut search) {
            results.push((*candidate.value, 1.0 - candidate.distance));
            if results.len() >= limit {
                break;
            }
        }

        results
    }
}
