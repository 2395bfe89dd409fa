use crate::graph::KnowledgeGraph;
use crate::model::{GraphNode, GraphRelationship, NodeLabel, RelType};
use crate::util::CancelToken;
use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use tracing::warn;

/// How far back the git log is mined by default.
pub const DEFAULT_MONTHS: u32 = 6;

/// Couplings weaker than this are dropped.
const MIN_STRENGTH: f64 = 0.3;

/// Pairs must co-change at least this often.
const MIN_CO_CHANGES: usize = 3;

/// Phase 11: mines the git log for files that change together and emits
/// `coupled_with` edges between file nodes for strong pairs. A missing
/// or failing git invocation is recovered as zero couplings. Returns
/// the number of edges created.
pub fn process_coupling(
    graph: &KnowledgeGraph,
    repo_path: &Path,
    months: u32,
    cancel: &CancelToken,
) -> Result<usize> {
    let commits = match git_log_file_sets(repo_path, months) {
        Ok(commits) => commits,
        Err(err) => {
            warn!(error = %err, "git log unavailable, skipping coupling analysis");
            return Ok(0);
        }
    };
    if commits.is_empty() {
        return Ok(0);
    }

    let mut matrix: HashMap<(String, String), usize> = HashMap::new();
    let mut total_changes: HashMap<String, usize> = HashMap::new();
    for commit in &commits {
        cancel.check()?;
        for file in commit {
            *total_changes.entry(file.clone()).or_insert(0) += 1;
        }
        for i in 0..commit.len() {
            for j in (i + 1)..commit.len() {
                let (a, b) = ordered_pair(&commit[i], &commit[j]);
                *matrix.entry((a, b)).or_insert(0) += 1;
            }
        }
    }

    let mut edge_count = 0;
    let mut pairs: Vec<(&(String, String), &usize)> = matrix.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    for ((file_a, file_b), &co_changes) in pairs {
        let total_a = total_changes.get(file_a).copied().unwrap_or(0);
        let total_b = total_changes.get(file_b).copied().unwrap_or(0);
        let strength = coupling_strength(co_changes, total_a, total_b);
        if strength < MIN_STRENGTH || co_changes < MIN_CO_CHANGES {
            continue;
        }

        let (Some(node_a), Some(node_b)) =
            (find_file_node(graph, file_a), find_file_node(graph, file_b))
        else {
            continue;
        };

        graph.add_relationship(
            GraphRelationship::new(
                format!("coupled:{file_a}:{file_b}"),
                RelType::CoupledWith,
                node_a.id,
                node_b.id,
            )
            .with_property("strength", json!(strength))
            .with_property("co_changes", json!(co_changes)),
        );
        edge_count += 1;
    }

    Ok(edge_count)
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// strength = co_changes / max(total_a, total_b).
pub fn coupling_strength(co_changes: usize, total_a: usize, total_b: usize) -> f64 {
    let max_total = total_a.max(total_b);
    if max_total == 0 {
        return 0.0;
    }
    co_changes as f64 / max_total as f64
}

fn git_log_file_sets(repo_path: &Path, months: u32) -> Result<Vec<Vec<String>>> {
    let output = Command::new("git")
        .arg("log")
        .arg(format!("--since={months} months ago"))
        .arg("--name-only")
        .arg("--pretty=format:COMMIT:%H")
        .current_dir(repo_path)
        .output()?;
    if !output.status.success() {
        anyhow::bail!(
            "git log failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(parse_git_log(&String::from_utf8_lossy(&output.stdout)))
}

/// Parses `git log --name-only --pretty=format:COMMIT:%H` output into
/// one changed-file list per commit. Malformed sections are skipped.
pub fn parse_git_log(output: &str) -> Vec<Vec<String>> {
    let mut commits = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut in_commit = false;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(_sha) = line.strip_prefix("COMMIT:") {
            if !current.is_empty() {
                commits.push(std::mem::take(&mut current));
            }
            in_commit = true;
        } else if in_commit {
            current.push(line.to_string());
        }
    }
    if !current.is_empty() {
        commits.push(current);
    }

    commits
}

/// File nodes are keyed by rel path; fall back to a scan so paths from
/// git log that differ in prefix still match by name.
fn find_file_node(graph: &KnowledgeGraph, file_path: &str) -> Option<GraphNode> {
    let node_id = format!("file:{file_path}");
    if let Some(node) = graph.get_node(&node_id) {
        return Some(node);
    }
    graph
        .get_nodes_by_label(NodeLabel::File)
        .into_iter()
        .find(|file| file.file_path == file_path || file.name == file_path)
}
