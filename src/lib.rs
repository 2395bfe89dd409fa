//! Axon: a code knowledge-graph indexer.
//!
//! The ingestion pipeline walks a repository, parses its sources, and
//! derives a knowledge graph of files, symbols and their relationships
//! (calls, imports, heritage, type usage), enriched with community,
//! execution-flow, dead-code and git-coupling analyses. The graph
//! persists in an embedded key-value store with full-text and vector
//! indexes fused at query time by Reciprocal Rank Fusion.

pub mod cli;
pub mod embeddings;
pub mod graph;
pub mod ingest;
pub mod meta;
pub mod model;
pub mod parsers;
pub mod storage;
pub mod util;

pub use graph::KnowledgeGraph;
pub use model::{
    generate_id, GraphNode, GraphRelationship, HybridSearchResult, NodeEmbedding, NodeLabel,
    RelType, SearchResult,
};
pub use storage::{MemoryBackend, RedbBackend, StorageBackend};
pub use util::CancelToken;
