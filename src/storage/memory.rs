use super::fts::FtsIndex;
use super::{
    cosine_similarity, Direction, StorageBackend, MAX_TRAVERSE_DEPTH, RRF_K,
};
use crate::graph::KnowledgeGraph;
use crate::model::{
    GraphNode, GraphRelationship, HybridSearchResult, NodeEmbedding, RelType, SearchResult,
};
use crate::util::{truncate_str_bytes, CancelToken};
use anyhow::Result;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

/// Map-backed storage backend. Used by the pipeline tests and for
/// ephemeral indexing where nothing should touch disk; behaviour
/// mirrors the persistent backend minus durability.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, GraphNode>,
    relationships: HashMap<String, GraphRelationship>,
    embeddings: HashMap<String, Vec<f32>>,
    fts: FtsIndex,
    initialized: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn embedding(&self, node_id: &str) -> Option<Vec<f32>> {
        self.inner.read().embeddings.get(node_id).cloned()
    }

    fn result_from_node(node: &GraphNode, score: f64) -> SearchResult {
        SearchResult {
            node_id: node.id.clone(),
            score,
            node_name: node.name.clone(),
            file_path: node.file_path.clone(),
            label: node.label.as_str().to_string(),
            snippet: truncate_str_bytes(&node.content, 200).to_string(),
        }
    }
}

impl Inner {
    fn adjacent(&self, node_id: &str, direction: Direction) -> Vec<GraphNode> {
        let mut nodes: Vec<GraphNode> = self
            .relationships
            .values()
            .filter(|rel| rel.rel_type == RelType::Calls)
            .filter_map(|rel| match direction {
                Direction::Callers if rel.target == node_id => self.nodes.get(&rel.source),
                Direction::Callees if rel.source == node_id => self.nodes.get(&rel.target),
                _ => None,
            })
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}

impl StorageBackend for MemoryBackend {
    fn initialize(&self, _path: &Path, _read_only: bool) -> Result<()> {
        self.inner.write().initialized = true;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.nodes.clear();
        inner.relationships.clear();
        inner.embeddings.clear();
        inner.fts.clear();
        inner.initialized = false;
        Ok(())
    }

    fn bulk_load(&self, cancel: &CancelToken, graph: &KnowledgeGraph) -> Result<()> {
        let mut inner = self.inner.write();
        for node in graph.iter_nodes() {
            cancel.check()?;
            inner.fts.index_node(&node);
            inner.nodes.insert(node.id.clone(), node);
        }
        for rel in graph.iter_relationships() {
            cancel.check()?;
            inner.relationships.insert(rel.id.clone(), rel);
        }
        inner.initialized = true;
        Ok(())
    }

    fn add_nodes(&self, cancel: &CancelToken, nodes: &[GraphNode]) -> Result<()> {
        let mut inner = self.inner.write();
        for node in nodes {
            cancel.check()?;
            inner.fts.index_node(node);
            inner.nodes.insert(node.id.clone(), node.clone());
        }
        Ok(())
    }

    fn add_relationships(&self, cancel: &CancelToken, rels: &[GraphRelationship]) -> Result<()> {
        let mut inner = self.inner.write();
        for rel in rels {
            cancel.check()?;
            inner.relationships.insert(rel.id.clone(), rel.clone());
        }
        Ok(())
    }

    fn remove_nodes_by_file(&self, _cancel: &CancelToken, file_path: &str) -> Result<usize> {
        let mut inner = self.inner.write();
        let victims: Vec<String> = inner
            .nodes
            .values()
            .filter(|node| node.file_path == file_path)
            .map(|node| node.id.clone())
            .collect();
        for node_id in &victims {
            inner.nodes.remove(node_id);
            inner.fts.remove_node(node_id);
            inner
                .relationships
                .retain(|_, rel| {
                    rel.rel_type != RelType::Calls
                        || (&rel.source != node_id && &rel.target != node_id)
                });
        }
        Ok(victims.len())
    }

    fn get_node(&self, _cancel: &CancelToken, node_id: &str) -> Result<Option<GraphNode>> {
        Ok(self.inner.read().nodes.get(node_id).cloned())
    }

    fn get_nodes_by_label(&self, _cancel: &CancelToken, label: &str) -> Result<Vec<GraphNode>> {
        let inner = self.inner.read();
        let mut nodes: Vec<GraphNode> = inner
            .nodes
            .values()
            .filter(|node| node.label.as_str() == label)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    fn get_callers(&self, _cancel: &CancelToken, node_id: &str) -> Result<Vec<GraphNode>> {
        Ok(self.inner.read().adjacent(node_id, Direction::Callers))
    }

    fn get_callees(&self, _cancel: &CancelToken, node_id: &str) -> Result<Vec<GraphNode>> {
        Ok(self.inner.read().adjacent(node_id, Direction::Callees))
    }

    fn traverse(
        &self,
        cancel: &CancelToken,
        start_id: &str,
        depth: usize,
        direction: Direction,
    ) -> Result<Vec<GraphNode>> {
        let depth = depth.min(MAX_TRAVERSE_DEPTH);
        let inner = self.inner.read();

        let mut visited: HashSet<String> = HashSet::new();
        let mut result = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(start_id.to_string(), 0)]);

        while let Some((current, current_depth)) = queue.pop_front() {
            cancel.check()?;
            if !visited.insert(current.clone()) {
                continue;
            }
            if current != start_id {
                if let Some(node) = inner.nodes.get(&current) {
                    result.push(node.clone());
                }
            }
            if current_depth < depth {
                for neighbour in inner.adjacent(&current, direction) {
                    if !visited.contains(&neighbour.id) {
                        queue.push_back((neighbour.id, current_depth + 1));
                    }
                }
            }
        }

        Ok(result)
    }

    fn fts_search(
        &self,
        _cancel: &CancelToken,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let inner = self.inner.read();
        let results = inner
            .fts
            .search(query, limit)
            .into_iter()
            .filter_map(|(node_id, score)| {
                inner
                    .nodes
                    .get(&node_id)
                    .map(|node| Self::result_from_node(node, score))
            })
            .collect();
        Ok(results)
    }

    fn vector_search(
        &self,
        cancel: &CancelToken,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let inner = self.inner.read();
        let mut scored: Vec<(String, f64)> = Vec::new();
        for (node_id, embedding) in &inner.embeddings {
            cancel.check()?;
            let similarity = cosine_similarity(vector, embedding);
            if similarity > 0.0 {
                scored.push((node_id.clone(), similarity));
            }
        }
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .filter_map(|(node_id, score)| {
                inner
                    .nodes
                    .get(&node_id)
                    .map(|node| Self::result_from_node(node, score))
            })
            .collect())
    }

    fn store_embeddings(&self, cancel: &CancelToken, embeddings: &[NodeEmbedding]) -> Result<()> {
        let mut inner = self.inner.write();
        for embedding in embeddings {
            cancel.check()?;
            inner
                .embeddings
                .insert(embedding.node_id.clone(), embedding.embedding.clone());
        }
        Ok(())
    }

    fn get_dead_code(&self, _cancel: &CancelToken) -> Result<Vec<GraphNode>> {
        let inner = self.inner.read();
        let mut dead: Vec<GraphNode> = inner
            .nodes
            .values()
            .filter(|node| node.is_dead)
            .cloned()
            .collect();
        dead.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(dead)
    }

    fn rebuild_fts_indexes(&self, cancel: &CancelToken) -> Result<()> {
        let mut inner = self.inner.write();
        let nodes: Vec<GraphNode> = inner.nodes.values().cloned().collect();
        inner.fts.clear();
        for node in &nodes {
            cancel.check()?;
            inner.fts.index_node(node);
        }
        Ok(())
    }

    fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    fn relationship_count(&self) -> usize {
        self.inner.read().relationships.len()
    }

    fn hybrid_search(
        &self,
        cancel: &CancelToken,
        query: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<HybridSearchResult>> {
        super::hybrid_search(cancel, self, query, query_vector, limit, RRF_K)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeLabel;

    #[test]
    fn bulk_load_and_search() {
        let graph = KnowledgeGraph::new();
        graph.add_node(GraphNode::new(NodeLabel::Class, "svc.ts", "UserService"));
        graph.add_node(GraphNode::new(NodeLabel::Function, "util.ts", "parseUser"));
        graph.add_node(GraphNode::new(NodeLabel::Function, "util.ts", "helper"));

        let backend = MemoryBackend::new();
        let cancel = CancelToken::new();
        backend.bulk_load(&cancel, &graph).unwrap();
        assert_eq!(backend.node_count(), 3);

        let hits = backend.fts_search(&cancel, "user", 10).unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.node_name.as_str()).collect();
        assert!(names.contains(&"UserService"));
        assert!(names.contains(&"parseUser"));
        assert!(!names.contains(&"helper"));
    }

    #[test]
    fn remove_by_file_cascades_calls_only() {
        let backend = MemoryBackend::new();
        let cancel = CancelToken::new();
        let a = GraphNode::new(NodeLabel::Function, "a.go", "a");
        let b = GraphNode::new(NodeLabel::Function, "b.go", "b");
        backend.add_nodes(&cancel, &[a.clone(), b.clone()]).unwrap();
        backend
            .add_relationships(
                &cancel,
                &[
                    GraphRelationship::new(
                        "call:a->b".into(),
                        RelType::Calls,
                        a.id.clone(),
                        b.id.clone(),
                    ),
                    GraphRelationship::new(
                        "uses:a->b".into(),
                        RelType::UsesType,
                        a.id.clone(),
                        b.id.clone(),
                    ),
                ],
            )
            .unwrap();

        let removed = backend.remove_nodes_by_file(&cancel, "a.go").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.node_count(), 1);
        // The calls relationship is gone; the uses_type one survives
        // (loose integrity, matching the persistent layer).
        assert_eq!(backend.relationship_count(), 1);
    }

    #[test]
    fn vector_search_prefers_closest() {
        let backend = MemoryBackend::new();
        let cancel = CancelToken::new();
        for (name, vec) in [
            ("A", vec![1.0f32, 0.0, 0.0]),
            ("B", vec![0.0f32, 1.0, 0.0]),
            ("C", vec![0.9f32, 0.1, 0.0]),
        ] {
            let node = GraphNode::new(NodeLabel::Function, "v.go", name);
            backend
                .store_embeddings(
                    &cancel,
                    &[NodeEmbedding {
                        node_id: node.id.clone(),
                        embedding: vec,
                    }],
                )
                .unwrap();
            backend.add_nodes(&cancel, &[node]).unwrap();
        }

        let results = backend
            .vector_search(&cancel, &[1.0, 0.0, 0.0], 2)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].node_name, "A");
        assert!(results[1].score < results[0].score);
        // B is orthogonal: zero similarity, never returned.
        assert!(results.iter().all(|r| r.node_name != "B"));
    }
}
