use crate::graph::KnowledgeGraph;
use crate::model::{GraphNode, GraphRelationship, HybridSearchResult, NodeEmbedding, SearchResult};
use crate::util::CancelToken;
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

pub mod fts;
pub mod memory;
pub mod redb_backend;

pub use memory::MemoryBackend;
pub use redb_backend::RedbBackend;

/// RRF constant: fused score contribution is `1 / (k + rank)`.
pub const RRF_K: usize = 60;

/// Hard cap on traversal depth, matching the flow tracer.
pub const MAX_TRAVERSE_DEPTH: usize = 10;

/// Traversal direction over `calls` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Callers,
    Callees,
}

/// Failures specific to the persistent layer. Key-not-found is never an
/// error; get-operations translate it to `None`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store is not initialized")]
    NotInitialized,
    #[error("store is opened read-only")]
    ReadOnly,
}

/// Persistent graph store: nodes, relationships, adjacency indexes,
/// embeddings, FTS. Implementations are thread-safe (readers/writer).
pub trait StorageBackend: Send + Sync {
    /// Opens or creates the store at `path`. On a non-read-only open
    /// over an existing corpus the in-memory FTS index and counters are
    /// rebuilt by scanning the persisted nodes and relationships.
    fn initialize(&self, path: &Path, read_only: bool) -> Result<()>;

    fn close(&self) -> Result<()>;

    /// Rewrites the store from the graph in one batched write. Resets
    /// counters and the in-memory FTS index. Stale keys from earlier
    /// corpora are not deleted; callers wanting a clean slate
    /// initialize a fresh path.
    fn bulk_load(&self, cancel: &CancelToken, graph: &KnowledgeGraph) -> Result<()>;

    fn add_nodes(&self, cancel: &CancelToken, nodes: &[GraphNode]) -> Result<()>;

    fn add_relationships(&self, cancel: &CancelToken, rels: &[GraphRelationship]) -> Result<()>;

    /// Deletes every node whose file path matches, plus the `calls`
    /// relationships recorded in its adjacency indexes. This is the
    /// only partial cascade the persistent layer performs.
    fn remove_nodes_by_file(&self, cancel: &CancelToken, file_path: &str) -> Result<usize>;

    fn get_node(&self, cancel: &CancelToken, node_id: &str) -> Result<Option<GraphNode>>;

    fn get_nodes_by_label(&self, cancel: &CancelToken, label: &str) -> Result<Vec<GraphNode>>;

    /// Nodes with a `calls` edge into `node_id`. Entries whose
    /// relationship or endpoint node is missing are silently skipped.
    fn get_callers(&self, cancel: &CancelToken, node_id: &str) -> Result<Vec<GraphNode>>;

    /// Nodes reached by `calls` edges out of `node_id`.
    fn get_callees(&self, cancel: &CancelToken, node_id: &str) -> Result<Vec<GraphNode>>;

    /// BFS over `calls` edges, capped at depth 10 regardless of the
    /// request. The start node is excluded from the result.
    fn traverse(
        &self,
        cancel: &CancelToken,
        start_id: &str,
        depth: usize,
        direction: Direction,
    ) -> Result<Vec<GraphNode>>;

    fn fts_search(&self, cancel: &CancelToken, query: &str, limit: usize)
        -> Result<Vec<SearchResult>>;

    /// Linear scan over stored embeddings by cosine similarity; only
    /// positive scores are kept.
    fn vector_search(
        &self,
        cancel: &CancelToken,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>>;

    /// One embedding record per input; no dimension check is performed.
    fn store_embeddings(&self, cancel: &CancelToken, embeddings: &[NodeEmbedding]) -> Result<()>;

    fn get_dead_code(&self, cancel: &CancelToken) -> Result<Vec<GraphNode>>;

    fn rebuild_fts_indexes(&self, cancel: &CancelToken) -> Result<()>;

    fn node_count(&self) -> usize;

    fn relationship_count(&self) -> usize;

    /// FTS + vector search fused by Reciprocal Rank Fusion.
    fn hybrid_search(
        &self,
        cancel: &CancelToken,
        query: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<HybridSearchResult>>;
}

/// Cosine similarity of two vectors; 0 for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Runs FTS and (when a query vector is supplied) vector search at
/// twice the requested limit, then fuses the two rankings with
/// `score += 1 / (k + rank)` per list, carrying first-seen metadata.
/// A failing retriever contributes zero results instead of failing the
/// search.
pub fn hybrid_search(
    cancel: &CancelToken,
    backend: &dyn StorageBackend,
    query: &str,
    query_vector: &[f32],
    limit: usize,
    k: usize,
) -> Result<Vec<HybridSearchResult>> {
    let fts_results = match backend.fts_search(cancel, query, limit * 2) {
        Ok(results) => results,
        Err(err) => {
            warn!(error = %err, "fts retriever failed, fusing vector results only");
            Vec::new()
        }
    };

    let vector_results = if query_vector.is_empty() {
        Vec::new()
    } else {
        match backend.vector_search(cancel, query_vector, limit * 2) {
            Ok(results) => results,
            Err(err) => {
                warn!(error = %err, "vector retriever failed, fusing fts results only");
                Vec::new()
            }
        }
    };

    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut metadata: HashMap<String, SearchResult> = HashMap::new();
    for list in [&fts_results, &vector_results] {
        for (rank, result) in list.iter().enumerate() {
            *scores.entry(result.node_id.clone()).or_insert(0.0) += 1.0 / (k + rank) as f64;
            metadata
                .entry(result.node_id.clone())
                .or_insert_with(|| result.clone());
        }
    }

    let mut fused: Vec<HybridSearchResult> = scores
        .into_iter()
        .map(|(node_id, score)| {
            let meta = &metadata[&node_id];
            HybridSearchResult {
                node_id: node_id.clone(),
                score,
                node_name: meta.node_name.clone(),
                file_path: meta.file_path.clone(),
                label: meta.label.clone(),
                snippet: meta.snippet.clone(),
            }
        })
        .collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    fused.truncate(limit);
    Ok(fused)
}
