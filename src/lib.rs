//! Graph Memory
//!
//! Bitemporal knowledge graph memory for AI agents, with semantic search,
//! bounded traversal, and read-time confidence decay.
//!
//! ## Features
//!
//! - **Bitemporal versioning** - Every entity and relation keeps its full version history; reads can replay the graph at any past instant
//! - **Semantic search** - Embedding-backed similarity search with an HNSW index above a size threshold and exact linear scan below it
//! - **Confidence decay** - Relation confidence ages along an exponential half-life, projected at read time without touching stored rows
//! - **RocksDB persistence** - Atomic write sets over RocksDB, with an in-memory backend for tests and ephemeral use
//!
//! ## Example
//!
//! ```ignore
//! use graph_memory::{EntityDraft, EntityType, GraphStore, GraphStoreConfig};
//!
//! // Open a persistent store
//! let store = GraphStore::open(&db_path, GraphStoreConfig::default())?;
//!
//! // Record an entity and read it back
//! store
//!     .create_entities(vec![
//!         EntityDraft::new("auth-service", EntityType::Component)
//!             .observation("Handles login and session refresh"),
//!     ])
//!     .await?;
//!
//! let entity = store.get_entity("auth-service").await?;
//! ```

pub mod cache;
pub mod decay;
pub mod embedding;
pub mod entity;
pub mod error;
pub mod index;
pub mod relation;
pub mod store;
pub mod temporal;
pub mod traversal;

// Re-exports for convenience
pub use cache::{CacheConfig, CacheStats, SearchCache};
pub use decay::DecayConfig;
pub use embedding::EmbeddingProvider;
pub use entity::{Entity, EntityDraft, EntityType};
pub use error::{GraphError, Result};
pub use index::{IndexStats, SimilarityHit, VectorIndex, VectorIndexConfig, VectorKey};
pub use relation::{Relation, RelationDraft, RelationKey, RelationType, RelationUpdate};
pub use store::{
    GraphBackend, GraphStore, GraphStoreConfig, KnowledgeGraph, MatchOrigin, MemoryBackend,
    ObservationAdd, ObservationAddResult, ObservationDelete, RocksBackend, SearchOptions,
    SemanticHit, SemanticSearchOptions, StoreStats, WriteSet,
};
pub use temporal::{now_ms, RowId, TimestampMs, VersionInfo};
pub use traversal::{Direction, TraversalNode, TraversalOptions, TraversalResult};
