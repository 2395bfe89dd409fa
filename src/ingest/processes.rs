use crate::graph::KnowledgeGraph;
use crate::model::{GraphNode, GraphRelationship, NodeLabel, RelType};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};

/// Maximum BFS depth when tracing a flow from an entry point.
const MAX_FLOW_DEPTH: usize = 10;

/// Phase 9: traces an execution flow from every entry point along
/// `calls` edges, deduplicates flows, and materialises a `process` node
/// with `step_in_process` edges carrying step numbers. Entry points are
/// visited in ID order so flow IDs are stable for a given graph.
/// Returns the number of process nodes created.
pub fn detect_processes(graph: &KnowledgeGraph) -> usize {
    let mut entry_points: Vec<GraphNode> = graph
        .iter_nodes()
        .into_iter()
        .filter(|node| node.label.is_symbol())
        .filter(is_entry_point)
        .collect();
    entry_points.sort_by(|a, b| a.id.cmp(&b.id));

    let mut flows: Vec<Vec<String>> = Vec::new();
    for entry in &entry_points {
        let flow = trace_flow(graph, &entry.id, MAX_FLOW_DEPTH);
        if !flow.is_empty() {
            flows.push(flow);
        }
    }

    let flows = deduplicate_flows(flows);

    let mut count = 0;
    for (i, flow) in flows.iter().enumerate() {
        if flow.is_empty() {
            continue;
        }
        let process_id = format!("process:flow-{i}");
        let mut node = GraphNode::new(NodeLabel::Process, "", "");
        node.id = process_id.clone();
        node.name = process_label(graph, flow);
        graph.add_node(node);
        count += 1;

        for (step, member) in flow.iter().enumerate() {
            graph.add_relationship(
                GraphRelationship::new(
                    format!("step:{process_id}:{step}"),
                    RelType::StepInProcess,
                    member.clone(),
                    process_id.clone(),
                )
                .with_property("step_number", json!(step)),
            );
        }
    }

    count
}

/// Entry points: the parser flag, `main`, test-style names, symbols
/// decorated with handler registrations, and command-like names.
pub fn is_entry_point(node: &GraphNode) -> bool {
    if node.is_entry_point {
        return true;
    }

    if node.label == NodeLabel::Function && node.name == "main" {
        return true;
    }

    if node.label == NodeLabel::Function
        && (node.name.starts_with("Test") || node.name.starts_with("test_"))
    {
        return true;
    }

    for decorator in &node.decorators {
        if decorator.contains("HandleFunc")
            || decorator.contains("Handle")
            || decorator.contains("http.")
        {
            return true;
        }
    }

    if node.name.contains("Cmd") || node.name.contains("Command") {
        return true;
    }

    false
}

/// Bounded BFS over `calls` edges; the flow is the visit order.
fn trace_flow(graph: &KnowledgeGraph, start: &str, max_depth: usize) -> Vec<String> {
    let mut flow = vec![start.to_string()];
    let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
    let mut depth: HashMap<String, usize> = HashMap::from([(start.to_string(), 0)]);
    let mut queue: VecDeque<String> = VecDeque::from([start.to_string()]);

    while let Some(current) = queue.pop_front() {
        let current_depth = depth[&current];
        if current_depth >= max_depth {
            continue;
        }
        for callee in graph.get_callees(&current) {
            if visited.insert(callee.id.clone()) {
                flow.push(callee.id.clone());
                depth.insert(callee.id.clone(), current_depth + 1);
                queue.push_back(callee.id);
            }
        }
    }

    flow
}

fn process_label(graph: &KnowledgeGraph, flow: &[String]) -> String {
    match flow.first().and_then(|id| graph.get_node(id)) {
        Some(entry) => format!("Flow from {}", entry.name),
        None => format!("Flow {}", flow.len()),
    }
}

/// Flows are identical when their `->`-joined ID strings match.
fn deduplicate_flows(flows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let mut seen = HashSet::new();
    let mut result = Vec::with_capacity(flows.len());
    for flow in flows {
        let key = flow.join("->");
        if seen.insert(key) {
            result.push(flow);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_function(graph: &KnowledgeGraph, name: &str) -> String {
        let node = GraphNode::new(NodeLabel::Function, "main.go", name);
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
    fn chain_from_main_gets_step_numbers() {
        let graph = KnowledgeGraph::new();
        let main = add_function(&graph, "main");
        let helper = add_function(&graph, "helper");
        let inner = add_function(&graph, "inner");
        add_call(&graph, &main, &helper);
        add_call(&graph, &helper, &inner);

        let count = detect_processes(&graph);
        assert_eq!(count, 1);

        let steps = graph.get_relationships_by_type(RelType::StepInProcess);
        assert_eq!(steps.len(), 3);
        let step_of = |id: &str| -> i64 {
            steps
                .iter()
                .find(|r| r.source == id)
                .and_then(|r| r.properties.get("step_number"))
                .and_then(|v| v.as_i64())
                .unwrap()
        };
        assert_eq!(step_of(&main), 0);
        assert_eq!(step_of(&helper), 1);
        assert_eq!(step_of(&inner), 2);
    }

    #[test]
    fn entry_point_conventions() {
        let make = |name: &str, label: NodeLabel| {
            let mut n = GraphNode::new(label, "m.go", name);
            n.name = name.to_string();
            n
        };
        assert!(is_entry_point(&make("main", NodeLabel::Function)));
        assert!(is_entry_point(&make("TestParse", NodeLabel::Function)));
        assert!(is_entry_point(&make("test_parse", NodeLabel::Function)));
        assert!(is_entry_point(&make("IndexCmd", NodeLabel::Class)));
        assert!(is_entry_point(&make("RunCommand", NodeLabel::Function)));
        assert!(!is_entry_point(&make("helper", NodeLabel::Function)));
        // Methods named Test* are not test entry points.
        assert!(!is_entry_point(&make("TestHook", NodeLabel::Method)));

        let mut decorated = make("users", NodeLabel::Function);
        decorated.decorators = vec!["mux.HandleFunc".to_string()];
        assert!(is_entry_point(&decorated));

        let mut flagged = make("boot", NodeLabel::Function);
        flagged.is_entry_point = true;
        assert!(is_entry_point(&flagged));
    }

    #[test]
    fn depth_cap_bounds_flow() {
        let graph = KnowledgeGraph::new();
        // main -> f1 -> f2 -> ... -> f12, deeper than the cap.
        let mut prev = add_function(&graph, "main");
        let mut all = vec![prev.clone()];
        for i in 1..=12 {
            let next = add_function(&graph, &format!("f{i}"));
            add_call(&graph, &prev, &next);
            all.push(next.clone());
            prev = next;
        }

        detect_processes(&graph);
        let steps = graph.get_relationships_by_type(RelType::StepInProcess);
        // Entry + 10 levels of callees; f11 and f12 are beyond the cap.
        assert_eq!(steps.len(), 11);
        assert!(!steps.iter().any(|r| r.source == all[11]));
    }

    #[test]
    fn identical_flows_deduplicate() {
        let flows = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["a".to_string(), "b".to_string()],
            vec!["a".to_string()],
        ];
        let deduped = deduplicate_flows(flows);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn cycles_do_not_loop_forever() {
        let graph = KnowledgeGraph::new();
        let main = add_function(&graph, "main");
        let a = add_function(&graph, "a");
        add_call(&graph, &main, &a);
        add_call(&graph, &a, &main);

        let count = detect_processes(&graph);
        assert_eq!(count, 1);
        let steps = graph.get_relationships_by_type(RelType::StepInProcess);
        assert_eq!(steps.len(), 2);
    }
}
