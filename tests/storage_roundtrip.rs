use axon::model::{GraphNode, GraphRelationship, NodeEmbedding, NodeLabel, RelType};
use axon::storage::{Direction, RedbBackend, StorageBackend};
use axon::{CancelToken, KnowledgeGraph};
use serde_json::json;

fn function(file: &str, name: &str) -> GraphNode {
    GraphNode::new(NodeLabel::Function, file, name)
}

fn calls(source: &GraphNode, target: &GraphNode) -> GraphRelationship {
    GraphRelationship::new(
        format!("call:{}->{}", source.name, target.name),
        RelType::Calls,
        source.id.clone(),
        target.id.clone(),
    )
    .with_property("confidence", json!(0.8))
}

fn sample_graph() -> (KnowledgeGraph, Vec<GraphNode>) {
    let graph = KnowledgeGraph::new();
    let mut user_service = GraphNode::new(NodeLabel::Class, "svc.ts", "UserService");
    user_service.signature = "class UserService".to_string();
    user_service.content = "class UserService { }".to_string();
    let parse_user = function("util.ts", "parseUser");
    let helper = function("util.ts", "helper");
    let main = function("main.ts", "main");

    graph.add_node(user_service.clone());
    graph.add_node(parse_user.clone());
    graph.add_node(helper.clone());
    graph.add_node(main.clone());
    graph.add_relationship(calls(&main, &parse_user));
    graph.add_relationship(calls(&parse_user, &helper));

    (graph, vec![user_service, parse_user, helper, main])
}

#[test]
fn bulk_load_then_readonly_reopen_recovers_everything() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let (graph, nodes) = sample_graph();

    {
        let store = RedbBackend::open(dir.path(), false).unwrap();
        store.bulk_load(&cancel, &graph).unwrap();
        assert_eq!(store.node_count(), 4);
        assert_eq!(store.relationship_count(), 2);
        store.close().unwrap();
    }

    let store = RedbBackend::open(dir.path(), true).unwrap();
    assert_eq!(store.node_count(), 4);
    assert_eq!(store.relationship_count(), 2);

    for node in &nodes {
        let loaded = store.get_node(&cancel, &node.id).unwrap().unwrap();
        assert_eq!(loaded.name, node.name);
        assert_eq!(loaded.label, node.label);
        assert_eq!(loaded.file_path, node.file_path);
    }

    // calls relationships are recoverable through the adjacency keys.
    let callees = store
        .get_callees(&cancel, "function:main.ts:main")
        .unwrap();
    assert_eq!(callees.len(), 1);
    assert_eq!(callees[0].name, "parseUser");

    let callers = store
        .get_callers(&cancel, "function:util.ts:helper")
        .unwrap();
    assert_eq!(callers.len(), 1);
    assert_eq!(callers[0].name, "parseUser");

    // The FTS index was rebuilt on open.
    let hits = store.fts_search(&cancel, "user", 10).unwrap();
    let names: Vec<&str> = hits.iter().map(|h| h.node_name.as_str()).collect();
    assert!(names.contains(&"UserService"));
    assert!(names.contains(&"parseUser"));
    assert!(!names.contains(&"helper"));
}

#[test]
fn get_missing_node_is_none_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let store = RedbBackend::open(dir.path(), false).unwrap();
    assert!(store.get_node(&cancel, "function:nope.go:nope").unwrap().is_none());
}

#[test]
fn read_only_store_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    {
        let store = RedbBackend::open(dir.path(), false).unwrap();
        store
            .add_nodes(&cancel, &[function("a.go", "seed")])
            .unwrap();
    }
    let store = RedbBackend::open(dir.path(), true).unwrap();
    let err = store
        .add_nodes(&cancel, &[function("a.go", "rejected")])
        .unwrap_err();
    assert!(err.to_string().contains("read-only"));
}

#[test]
fn incremental_adds_are_visible() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let store = RedbBackend::open(dir.path(), false).unwrap();

    let a = function("a.go", "alpha");
    let b = function("a.go", "beta");
    store.add_nodes(&cancel, &[a.clone(), b.clone()]).unwrap();
    store
        .add_relationships(&cancel, &[calls(&a, &b)])
        .unwrap();

    assert_eq!(store.node_count(), 2);
    assert_eq!(store.relationship_count(), 1);
    assert_eq!(
        store.get_callees(&cancel, &a.id).unwrap()[0].name,
        "beta"
    );
    // Re-adding the same node does not double count.
    store.add_nodes(&cancel, &[a.clone()]).unwrap();
    assert_eq!(store.node_count(), 2);
}

#[test]
fn remove_nodes_by_file_partial_cascade() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let (graph, _) = sample_graph();
    let store = RedbBackend::open(dir.path(), false).unwrap();
    store.bulk_load(&cancel, &graph).unwrap();

    let removed = store.remove_nodes_by_file(&cancel, "util.ts").unwrap();
    assert_eq!(removed, 2);
    assert!(store
        .get_node(&cancel, "function:util.ts:parseUser")
        .unwrap()
        .is_none());
    // Both calls relationships touched util.ts nodes and are gone.
    assert_eq!(store.relationship_count(), 0);
    // FTS no longer surfaces the removed nodes.
    let hits = store.fts_search(&cancel, "parse", 10).unwrap();
    assert!(hits.is_empty());
    // Untouched files survive.
    assert!(store
        .get_node(&cancel, "class:svc.ts:UserService")
        .unwrap()
        .is_some());
}

#[test]
fn traverse_caps_depth_at_ten() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let graph = KnowledgeGraph::new();

    let mut prev = function("chain.go", "f0");
    graph.add_node(prev.clone());
    for i in 1..=12 {
        let next = function("chain.go", &format!("f{i}"));
        graph.add_node(next.clone());
        graph.add_relationship(calls(&prev, &next));
        prev = next;
    }

    let store = RedbBackend::open(dir.path(), false).unwrap();
    store.bulk_load(&cancel, &graph).unwrap();

    let reached = store
        .traverse(&cancel, "function:chain.go:f0", 50, Direction::Callees)
        .unwrap();
    assert_eq!(reached.len(), 10);
    assert!(!reached.iter().any(|n| n.name == "f11"));
    assert!(!reached.iter().any(|n| n.name == "f0"));
}

#[test]
fn dangling_adjacency_entries_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let store = RedbBackend::open(dir.path(), false).unwrap();

    let a = function("a.go", "a");
    let ghost = function("a.go", "ghost");
    store.add_nodes(&cancel, &[a.clone()]).unwrap();
    // Relationship to a node that was never stored.
    store
        .add_relationships(&cancel, &[calls(&a, &ghost)])
        .unwrap();

    let callees = store.get_callees(&cancel, &a.id).unwrap();
    assert!(callees.is_empty());
}

#[test]
fn vector_search_ranks_by_cosine() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let store = RedbBackend::open(dir.path(), false).unwrap();

    let a = function("v.go", "A");
    let b = function("v.go", "B");
    let c = function("v.go", "C");
    store
        .add_nodes(&cancel, &[a.clone(), b.clone(), c.clone()])
        .unwrap();
    store
        .store_embeddings(
            &cancel,
            &[
                NodeEmbedding {
                    node_id: a.id.clone(),
                    embedding: vec![1.0, 0.0, 0.0],
                },
                NodeEmbedding {
                    node_id: b.id.clone(),
                    embedding: vec![0.0, 1.0, 0.0],
                },
                NodeEmbedding {
                    node_id: c.id.clone(),
                    embedding: vec![0.0, 0.0, 1.0],
                },
            ],
        )
        .unwrap();

    let results = store
        .vector_search(&cancel, &[1.0, 0.0, 0.0], 2)
        .unwrap();
    // Only A has positive similarity; orthogonal vectors score zero
    // and are dropped.
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].node_name, "A");
    assert!((results[0].score - 1.0).abs() < 1e-6);
}

#[test]
fn hybrid_search_fuses_and_respects_pairwise_order() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let store = RedbBackend::open(dir.path(), false).unwrap();

    // "alpha" matches both nodes textually, but top ranks alpha-heavy.
    let mut strong = function("a.go", "alphaAlpha");
    strong.signature = "alpha alpha".to_string();
    strong.content = "alpha alpha alpha".to_string();
    let weak = function("b.go", "alphaOnce");
    store
        .add_nodes(&cancel, &[strong.clone(), weak.clone()])
        .unwrap();
    store
        .store_embeddings(
            &cancel,
            &[
                NodeEmbedding {
                    node_id: strong.id.clone(),
                    embedding: vec![1.0, 0.0],
                },
                NodeEmbedding {
                    node_id: weak.id.clone(),
                    embedding: vec![0.6, 0.8],
                },
            ],
        )
        .unwrap();

    // strong ranks first in FTS (higher TF) and first in vector search
    // (exact direction match); fused order must not invert that.
    let results = store
        .hybrid_search(&cancel, "alpha", &[1.0, 0.0], 5)
        .unwrap();
    assert!(results.len() >= 2);
    let pos = |id: &str| results.iter().position(|r| r.node_id == id).unwrap();
    assert!(pos(&strong.id) < pos(&weak.id));

    // A failing retriever is not fatal: empty vector just skips the
    // vector side.
    let text_only = store.hybrid_search(&cancel, "alpha", &[], 5).unwrap();
    assert!(!text_only.is_empty());
}

#[test]
fn rebuild_fts_indexes_restores_search() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let (graph, _) = sample_graph();
    let store = RedbBackend::open(dir.path(), false).unwrap();
    store.bulk_load(&cancel, &graph).unwrap();

    store.rebuild_fts_indexes(&cancel).unwrap();
    let hits = store.fts_search(&cancel, "user", 10).unwrap();
    assert!(hits.iter().any(|h| h.node_name == "UserService"));
}

#[test]
fn dead_nodes_survive_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let graph = KnowledgeGraph::new();
    let mut dead = function("a.go", "unused");
    dead.is_dead = true;
    dead.set_property("dead_code_confidence", json!("medium"));
    graph.add_node(dead);
    graph.add_node(function("a.go", "used"));

    {
        let store = RedbBackend::open(dir.path(), false).unwrap();
        store.bulk_load(&cancel, &graph).unwrap();
    }

    let store = RedbBackend::open(dir.path(), true).unwrap();
    let dead_nodes = store.get_dead_code(&cancel).unwrap();
    assert_eq!(dead_nodes.len(), 1);
    assert_eq!(dead_nodes[0].name, "unused");
    assert_eq!(
        dead_nodes[0].property_str("dead_code_confidence"),
        Some("medium")
    );
}

#[test]
fn cancelled_bulk_load_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, _) = sample_graph();
    let store = RedbBackend::open(dir.path(), false).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(store.bulk_load(&cancel, &graph).is_err());

    let fresh = CancelToken::new();
    assert!(store
        .get_node(&fresh, "function:main.ts:main")
        .unwrap()
        .is_none());
}
