//! Benchmarks for the hot read paths: decay projection, cache lookups,
//! vector search in both linear and HNSW modes, and graph traversal.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use graph_memory::cache::{CacheConfig, CacheKey, SearchCache};
use graph_memory::decay::decay;
use graph_memory::entity::{EntityDraft, EntityType};
use graph_memory::index::{VectorIndex, VectorIndexConfig, VectorKey};
use graph_memory::relation::{RelationDraft, RelationType};
use graph_memory::store::{GraphStore, GraphStoreConfig, MemoryBackend};
use graph_memory::traversal::TraversalOptions;

/// Deterministic pseudo-random unit vector
fn generate_vector(dimension: usize, seed: u64) -> Vec<f32> {
    let raw: Vec<f32> = (0..dimension)
        .map(|i| (((i as f64) * 0.7 + (seed as f64) * 1.3).sin()) as f32)
        .collect();
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    raw.iter().map(|x| x / norm).collect()
}

fn bench_decay(c: &mut Criterion) {
    c.bench_function("decay_projection", |b| {
        b.iter(|| {
            decay(
                black_box(0.9),
                black_box(86_400_000 * 45),
                black_box(30.0),
                black_box(0.1),
            )
        })
    });
}

fn bench_cache(c: &mut Criterion) {
    let cache: SearchCache<Vec<f64>> = SearchCache::new(CacheConfig {
        max_bytes: 10 * 1024 * 1024,
        default_ttl: Duration::from_secs(300),
    });
    for i in 0..1_000 {
        let key = CacheKey::new(&format!("query-{i}"), &[("limit", "10".to_string())]);
        cache.set(key, vec![0.5f64; 16]);
    }
    let hot = CacheKey::new("query-500", &[("limit", "10".to_string())]);

    c.bench_function("cache_get_hit", |b| b.iter(|| cache.get(black_box(&hot))));

    c.bench_function("cache_set", |b| {
        b.iter(|| {
            let key = CacheKey::new("query-new", &[("limit", "10".to_string())]);
            cache.set(key, black_box(vec![0.5f64; 16]));
        })
    });
}

fn bench_vector_search(c: &mut Criterion) {
    let dimension = 384;
    let count = 1_000;
    let query = generate_vector(dimension, 99_991);

    let linear = VectorIndex::new(VectorIndexConfig {
        dimension,
        // Keep the index above threshold but never refreshed: linear scan
        ann_threshold: 64,
        ef_construction: 100,
    });
    for i in 0..count {
        linear
            .upsert(
                VectorKey::new(format!("entity-{i}"), 0),
                &generate_vector(dimension, i),
            )
            .unwrap();
    }

    c.bench_function("vector_search_linear_1k", |b| {
        b.iter(|| linear.search(black_box(&query), 10, 0.0).unwrap())
    });

    let rt = tokio::runtime::Runtime::new().unwrap();
    let ann = VectorIndex::new(VectorIndexConfig {
        dimension,
        ann_threshold: 64,
        ef_construction: 100,
    });
    for i in 0..count {
        ann.upsert(
            VectorKey::new(format!("entity-{i}"), 0),
            &generate_vector(dimension, i),
        )
        .unwrap();
    }
    rt.block_on(ann.refresh()).unwrap();

    c.bench_function("vector_search_hnsw_1k", |b| {
        b.iter(|| ann.search(black_box(&query), 10, 0.0).unwrap())
    });
}

fn bench_traverse(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = GraphStore::new(MemoryBackend::new(), GraphStoreConfig::default()).unwrap();

    // A binary tree of 511 components, root at depth 0
    rt.block_on(async {
        let drafts = (0..511)
            .map(|i| EntityDraft::new(format!("node-{i}"), EntityType::Component))
            .collect();
        store.create_entities(drafts).await.unwrap();

        let relations = (1..511)
            .map(|i| {
                RelationDraft::new(
                    format!("node-{}", (i - 1) / 2),
                    format!("node-{i}"),
                    RelationType::PartOf,
                )
            })
            .collect();
        store.create_relations(relations).await.unwrap();
    });

    let options = TraversalOptions {
        max_depth: 4,
        ..TraversalOptions::default()
    };
    c.bench_function("traverse_tree_depth4", |b| {
        b.iter(|| rt.block_on(store.traverse(black_box("node-0"), &options)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_decay,
    bench_cache,
    bench_vector_search,
    bench_traverse
);
criterion_main!(benches);
