use crate::graph::KnowledgeGraph;
use crate::model::{GraphNode, GraphRelationship, NodeLabel, RelType};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::json;
use std::collections::{HashMap, HashSet};

const MAX_PASSES: usize = 100;

/// Shuffle seed for the local-move pass. A seeded order keeps runs
/// reproducible, which the contract permits.
const SHUFFLE_SEED: u64 = 0x5eed;

/// Phase 8: groups symbol nodes into communities by modularity
/// optimisation over the symmetrised `calls` adjacency, then materialises
/// a `community` node and `member_of` edges per non-empty community.
/// Returns the number of communities created.
pub fn detect_communities(graph: &KnowledgeGraph) -> usize {
    let (matrix, index_node) = build_adjacency_matrix(graph);
    if matrix.is_empty() {
        return 0;
    }

    let assignments = assign_communities(&matrix);

    let mut members_by_community: HashMap<usize, Vec<String>> = HashMap::new();
    for (node_idx, community) in assignments.iter().enumerate() {
        members_by_community
            .entry(*community)
            .or_default()
            .push(index_node[node_idx].clone());
    }

    let mut count = 0;
    for (community, members) in members_by_community {
        if members.is_empty() {
            continue;
        }
        let community_id = format!("community:{community}");
        let mut node = GraphNode::new(NodeLabel::Community, "", "");
        node.id = community_id.clone();
        node.name = community_label(graph, &members);
        node.set_property("member_count", json!(members.len()));
        node.set_property("members", json!(members));
        graph.add_node(node);
        count += 1;

        for member in &members {
            graph.add_relationship(GraphRelationship::new(
                format!("member:{member}:{community_id}"),
                RelType::MemberOf,
                member.clone(),
                community_id.clone(),
            ));
        }
    }

    count
}

fn symbol_nodes(graph: &KnowledgeGraph) -> Vec<GraphNode> {
    let mut nodes = Vec::new();
    for label in [
        NodeLabel::Function,
        NodeLabel::Method,
        NodeLabel::Class,
        NodeLabel::Interface,
    ] {
        nodes.extend(graph.get_nodes_by_label(label));
    }
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    nodes
}

/// Symmetrised weighted adjacency over symbol nodes; entries count
/// `calls` edges in either direction.
fn build_adjacency_matrix(graph: &KnowledgeGraph) -> (Vec<Vec<f64>>, Vec<String>) {
    let nodes = symbol_nodes(graph);
    let n = nodes.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }

    let mut node_index: HashMap<String, usize> = HashMap::with_capacity(n);
    let mut index_node = Vec::with_capacity(n);
    for (i, node) in nodes.iter().enumerate() {
        node_index.insert(node.id.clone(), i);
        index_node.push(node.id.clone());
    }

    let mut matrix = vec![vec![0.0f64; n]; n];
    for rel in graph.get_relationships_by_type(RelType::Calls) {
        let (Some(&src), Some(&tgt)) = (node_index.get(&rel.source), node_index.get(&rel.target))
        else {
            continue;
        };
        matrix[src][tgt] += 1.0;
        matrix[tgt][src] += 1.0;
    }

    (matrix, index_node)
}

/// Local-move modularity optimisation: starting from singleton
/// communities, repeatedly offer each node the communities of its
/// neighbours and take the move with the largest positive gain, until a
/// full pass makes no move or the pass cap is hit. Community IDs are
/// renumbered contiguously from 0.
fn assign_communities(matrix: &[Vec<f64>]) -> Vec<usize> {
    let n = matrix.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![0];
    }

    let mut communities: Vec<usize> = (0..n).collect();

    let total_weight: f64 = matrix.iter().flatten().sum();
    if total_weight == 0.0 {
        return communities;
    }

    let degrees: Vec<f64> = matrix.iter().map(|row| row.iter().sum()).collect();

    let mut rng = StdRng::seed_from_u64(SHUFFLE_SEED);
    let mut improved = true;
    let mut passes = 0;
    while improved && passes < MAX_PASSES {
        improved = false;
        passes += 1;

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng);

        for &node in &order {
            let current = communities[node];
            let mut best_comm = current;
            let mut best_gain = 0.0;

            let neighbour_comms: HashSet<usize> = (0..n)
                .filter(|&j| matrix[node][j] > 0.0)
                .map(|j| communities[j])
                .collect();

            for &comm in &neighbour_comms {
                if comm == best_comm {
                    continue;
                }
                communities[node] = comm;
                let gain =
                    modularity_gain(node, comm, &communities, matrix, &degrees, total_weight);
                if gain > best_gain {
                    best_gain = gain;
                    best_comm = comm;
                    improved = true;
                }
            }

            communities[node] = best_comm;
        }
    }

    // Renumber contiguously.
    let mut remap: HashMap<usize, usize> = HashMap::new();
    let mut next = 0;
    for comm in communities.iter_mut() {
        let renumbered = *remap.entry(*comm).or_insert_with(|| {
            let id = next;
            next += 1;
            id
        });
        *comm = renumbered;
    }

    communities
}

/// Δ = σ_in / m − (k_i · σ_tot) / m².
fn modularity_gain(
    node: usize,
    comm: usize,
    communities: &[usize],
    matrix: &[Vec<f64>],
    degrees: &[f64],
    total_weight: f64,
) -> f64 {
    let mut sigma_in = 0.0;
    let mut sigma_tot = 0.0;
    for (j, &community) in communities.iter().enumerate() {
        if community == comm && j != node {
            sigma_in += matrix[node][j];
            sigma_tot += degrees[j];
        }
    }
    sigma_tot += degrees[node];

    let k_i = degrees[node];
    (sigma_in / total_weight) - ((k_i * sigma_tot) / (total_weight * total_weight))
}

/// Label built from the first three member names (sorted), with a
/// "+N more" suffix past that.
fn community_label(graph: &KnowledgeGraph, members: &[String]) -> String {
    let mut names: Vec<String> = members
        .iter()
        .filter_map(|id| graph.get_node(id).map(|n| n.name))
        .collect();
    if names.is_empty() {
        return format!("Community ({} members)", members.len());
    }
    names.sort();
    if names.len() <= 3 {
        format!("Community ({})", names.join(", "))
    } else {
        format!(
            "Community ({}, +{} more)",
            names[..3].join(", "),
            names.len() - 3
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::generate_id;

    fn add_function(graph: &KnowledgeGraph, file: &str, name: &str) -> String {
        let node = GraphNode::new(NodeLabel::Function, file, name);
        let id = node.id.clone();
        graph.add_node(node);
        id
    }

    fn add_call(graph: &KnowledgeGraph, source: &str, target: &str) {
        graph.add_relationship(GraphRelationship::new(
            format!("call:{source}->{target}"),
            RelType::Calls,
            source.to_string(),
            target.to_string(),
        ));
    }

    #[test]
    fn empty_graph_yields_no_communities() {
        let graph = KnowledgeGraph::new();
        assert_eq!(detect_communities(&graph), 0);
    }

    #[test]
    fn two_call_clusters_separate() {
        let graph = KnowledgeGraph::new();
        // Cluster one: a <-> b <-> c, densely connected.
        let a = add_function(&graph, "one.go", "a");
        let b = add_function(&graph, "one.go", "b");
        let c = add_function(&graph, "one.go", "c");
        add_call(&graph, &a, &b);
        add_call(&graph, &b, &c);
        add_call(&graph, &c, &a);
        // Cluster two: x <-> y <-> z.
        let x = add_function(&graph, "two.go", "x");
        let y = add_function(&graph, "two.go", "y");
        let z = add_function(&graph, "two.go", "z");
        add_call(&graph, &x, &y);
        add_call(&graph, &y, &z);
        add_call(&graph, &z, &x);

        let count = detect_communities(&graph);
        assert_eq!(count, 2);
        assert_eq!(graph.count_nodes_by_label(NodeLabel::Community), 2);

        // Members of the same triangle end up in the same community.
        let member_of = graph.get_relationships_by_type(RelType::MemberOf);
        let community_of = |id: &str| -> String {
            member_of
                .iter()
                .find(|r| r.source == id)
                .map(|r| r.target.clone())
                .unwrap()
        };
        assert_eq!(community_of(&a), community_of(&b));
        assert_eq!(community_of(&b), community_of(&c));
        assert_eq!(community_of(&x), community_of(&y));
        assert_ne!(community_of(&a), community_of(&x));
    }

    #[test]
    fn every_symbol_lands_in_exactly_one_community() {
        let graph = KnowledgeGraph::new();
        let a = add_function(&graph, "m.go", "a");
        let b = add_function(&graph, "m.go", "b");
        add_call(&graph, &a, &b);
        // Isolated symbol keeps its own community.
        let lone = add_function(&graph, "m.go", "lone");

        detect_communities(&graph);

        let member_of = graph.get_relationships_by_type(RelType::MemberOf);
        for id in [&a, &b, &lone] {
            let memberships = member_of.iter().filter(|r| &r.source == id).count();
            assert_eq!(memberships, 1, "node {id} must be in exactly one community");
        }
        // No community node is empty.
        for community in graph.get_nodes_by_label(NodeLabel::Community) {
            let members = member_of
                .iter()
                .filter(|r| r.target == community.id)
                .count();
            assert!(members > 0);
        }
    }

    #[test]
    fn label_truncates_past_three_members() {
        let graph = KnowledgeGraph::new();
        let ids: Vec<String> = (0..5)
            .map(|i| add_function(&graph, "m.go", &format!("f{i}")))
            .collect();
        let label = community_label(&graph, &ids);
        assert!(label.contains("+2 more"), "label was {label}");
    }

    #[test]
    fn files_are_not_community_members() {
        let graph = KnowledgeGraph::new();
        let mut file = GraphNode::new(NodeLabel::File, "m.go", "");
        file.name = "m.go".to_string();
        graph.add_node(file);
        let a = add_function(&graph, "m.go", "a");
        let _ = generate_id(NodeLabel::File, "m.go", "");

        detect_communities(&graph);
        let member_of = graph.get_relationships_by_type(RelType::MemberOf);
        assert!(member_of.iter().all(|r| r.source == a));
    }
}
