use crate::model::{GraphNode, GraphRelationship, NodeLabel, RelType};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// In-memory directed multigraph of code-level entities.
///
/// Nodes and relationships are keyed by their ID strings. Secondary
/// indexes (label, relationship type, outgoing/incoming adjacency) keep
/// lookups proportional to the result set rather than the graph size,
/// and every mutation updates the primary map and its indexes under the
/// same write lock. Adjacency indexes hold relationship IDs only;
/// entities are fetched by ID on demand.
///
/// Removing a node cascades to every relationship where it appears as
/// source or target.
#[derive(Default, Debug)]
pub struct KnowledgeGraph {
    inner: RwLock<Inner>,
}

#[derive(Default, Debug)]
struct Inner {
    nodes: HashMap<String, GraphNode>,
    relationships: HashMap<String, GraphRelationship>,

    by_label: HashMap<NodeLabel, HashSet<String>>,
    by_rel_type: HashMap<RelType, HashSet<String>>,
    outgoing: HashMap<String, HashSet<String>>,
    incoming: HashMap<String, HashSet<String>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.inner.read().relationships.len()
    }

    pub fn count_nodes_by_label(&self, label: NodeLabel) -> usize {
        self.inner
            .read()
            .by_label
            .get(&label)
            .map_or(0, HashSet::len)
    }

    /// Upserts a node. A re-insert under the same ID replaces the stored
    /// value; if the label changed, the old label-index entry is cleared
    /// before the new one is written.
    pub fn add_node(&self, node: GraphNode) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.nodes.get(&node.id) {
            if old.label != node.label {
                let old_label = old.label;
                if let Some(set) = inner.by_label.get_mut(&old_label) {
                    set.remove(&node.id);
                }
            }
        }
        inner
            .by_label
            .entry(node.label)
            .or_default()
            .insert(node.id.clone());
        inner.nodes.insert(node.id.clone(), node);
    }

    pub fn get_node(&self, node_id: &str) -> Option<GraphNode> {
        self.inner.read().nodes.get(node_id).cloned()
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.inner.read().nodes.contains_key(node_id)
    }

    /// Applies `f` to the stored node under the write lock. Returns
    /// false when the node does not exist. The analysis phases use this
    /// to flip flags and annotate properties in place.
    pub fn update_node<F>(&self, node_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut GraphNode),
    {
        let mut inner = self.inner.write();
        match inner.nodes.get_mut(node_id) {
            Some(node) => {
                f(node);
                true
            }
            None => false,
        }
    }

    /// Removes a node and cascade-deletes every incident relationship.
    /// Returns true if the node existed.
    pub fn remove_node(&self, node_id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(node) = inner.nodes.remove(node_id) else {
            return false;
        };
        if let Some(set) = inner.by_label.get_mut(&node.label) {
            set.remove(node_id);
        }
        inner.cascade_relationships(node_id);
        true
    }

    /// Removes every node whose `file_path` matches, with full cascade.
    /// Returns the number of nodes removed.
    pub fn remove_nodes_by_file(&self, file_path: &str) -> usize {
        let mut inner = self.inner.write();
        let ids: Vec<String> = inner
            .nodes
            .values()
            .filter(|node| node.file_path == file_path)
            .map(|node| node.id.clone())
            .collect();

        for id in &ids {
            if let Some(node) = inner.nodes.remove(id) {
                if let Some(set) = inner.by_label.get_mut(&node.label) {
                    set.remove(id);
                }
            }
        }
        for id in &ids {
            inner.cascade_relationships(id);
        }
        ids.len()
    }

    /// Upserts a relationship. A replaced relationship is first removed
    /// from the type and adjacency indexes so no stale entry survives.
    pub fn add_relationship(&self, rel: GraphRelationship) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.relationships.remove(&rel.id) {
            if let Some(set) = inner.by_rel_type.get_mut(&old.rel_type) {
                set.remove(&rel.id);
            }
            if let Some(set) = inner.outgoing.get_mut(&old.source) {
                set.remove(&rel.id);
            }
            if let Some(set) = inner.incoming.get_mut(&old.target) {
                set.remove(&rel.id);
            }
        }
        inner
            .by_rel_type
            .entry(rel.rel_type)
            .or_default()
            .insert(rel.id.clone());
        inner
            .outgoing
            .entry(rel.source.clone())
            .or_default()
            .insert(rel.id.clone());
        inner
            .incoming
            .entry(rel.target.clone())
            .or_default()
            .insert(rel.id.clone());
        inner.relationships.insert(rel.id.clone(), rel);
    }

    pub fn get_relationship(&self, rel_id: &str) -> Option<GraphRelationship> {
        self.inner.read().relationships.get(rel_id).cloned()
    }

    /// All nodes carrying the given label, ordered by ID so repeated
    /// runs resolve ambiguous names identically.
    pub fn get_nodes_by_label(&self, label: NodeLabel) -> Vec<GraphNode> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_label.get(&label) else {
            return Vec::new();
        };
        let mut nodes: Vec<GraphNode> = ids
            .iter()
            .filter_map(|id| inner.nodes.get(id).cloned())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn get_relationships_by_type(&self, rel_type: RelType) -> Vec<GraphRelationship> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_rel_type.get(&rel_type) else {
            return Vec::new();
        };
        let mut rels: Vec<GraphRelationship> = ids
            .iter()
            .filter_map(|id| inner.relationships.get(id).cloned())
            .collect();
        rels.sort_by(|a, b| a.id.cmp(&b.id));
        rels
    }

    /// Relationships originating from `node_id`, optionally filtered by
    /// type.
    pub fn get_outgoing(&self, node_id: &str, rel_type: Option<RelType>) -> Vec<GraphRelationship> {
        let inner = self.inner.read();
        inner.adjacent(&inner.outgoing, node_id, rel_type)
    }

    /// Relationships targeting `node_id`, optionally filtered by type.
    pub fn get_incoming(&self, node_id: &str, rel_type: Option<RelType>) -> Vec<GraphRelationship> {
        let inner = self.inner.read();
        inner.adjacent(&inner.incoming, node_id, rel_type)
    }

    pub fn has_incoming(&self, node_id: &str, rel_type: RelType) -> bool {
        let inner = self.inner.read();
        inner.incoming.get(node_id).is_some_and(|ids| {
            ids.iter().any(|id| {
                inner
                    .relationships
                    .get(id)
                    .is_some_and(|rel| rel.rel_type == rel_type)
            })
        })
    }

    /// Nodes reached by outgoing `calls` edges from `node_id`, ordered
    /// by ID.
    pub fn get_callees(&self, node_id: &str) -> Vec<GraphNode> {
        let inner = self.inner.read();
        let Some(ids) = inner.outgoing.get(node_id) else {
            return Vec::new();
        };
        let mut callees: Vec<GraphNode> = ids
            .iter()
            .filter_map(|id| inner.relationships.get(id))
            .filter(|rel| rel.rel_type == RelType::Calls)
            .filter_map(|rel| inner.nodes.get(&rel.target).cloned())
            .collect();
        callees.sort_by(|a, b| a.id.cmp(&b.id));
        callees
    }

    /// Snapshot of all nodes. Iteration over the snapshot does not see
    /// concurrent mutations.
    pub fn iter_nodes(&self) -> Vec<GraphNode> {
        self.inner.read().nodes.values().cloned().collect()
    }

    /// Snapshot of all node IDs, sorted.
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of all relationships.
    pub fn iter_relationships(&self) -> Vec<GraphRelationship> {
        self.inner.read().relationships.values().cloned().collect()
    }
}

impl Inner {
    fn adjacent(
        &self,
        index: &HashMap<String, HashSet<String>>,
        node_id: &str,
        rel_type: Option<RelType>,
    ) -> Vec<GraphRelationship> {
        let Some(ids) = index.get(node_id) else {
            return Vec::new();
        };
        let mut rels: Vec<GraphRelationship> = ids
            .iter()
            .filter_map(|id| self.relationships.get(id))
            .filter(|rel| rel_type.map_or(true, |t| rel.rel_type == t))
            .cloned()
            .collect();
        rels.sort_by(|a, b| a.id.cmp(&b.id));
        rels
    }

    /// Deletes every relationship touching `node_id` from the primary
    /// map and all indexes. Caller holds the write lock.
    fn cascade_relationships(&mut self, node_id: &str) {
        if let Some(out_ids) = self.outgoing.remove(node_id) {
            for rel_id in out_ids {
                if let Some(rel) = self.relationships.remove(&rel_id) {
                    if let Some(set) = self.by_rel_type.get_mut(&rel.rel_type) {
                        set.remove(&rel_id);
                    }
                    if let Some(set) = self.incoming.get_mut(&rel.target) {
                        set.remove(&rel_id);
                    }
                }
            }
        }
        if let Some(in_ids) = self.incoming.remove(node_id) {
            for rel_id in in_ids {
                if let Some(rel) = self.relationships.remove(&rel_id) {
                    if let Some(set) = self.by_rel_type.get_mut(&rel.rel_type) {
                        set.remove(&rel_id);
                    }
                    if let Some(set) = self.outgoing.get_mut(&rel.source) {
                        set.remove(&rel_id);
                    }
                }
            }
        }
    }
}
