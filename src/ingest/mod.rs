use crate::graph::KnowledgeGraph;
use crate::model::{generate_id, GraphNode, GraphRelationship, NodeLabel, RelType};
use crate::parsers::{self, ParseResult};
use crate::storage::StorageBackend;
use crate::util::{base_name, parent_dir, CancelToken};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

pub mod community;
pub mod coupling;
pub mod dead_code;
pub mod processes;
pub mod walker;

pub use walker::{walk_repo, FileEntry};

/// Parse results keyed by rel path, shared by phases 4-7.
#[derive(Default)]
pub struct ParseData {
    pub files: HashMap<String, ParseResult>,
}

/// Summary of a pipeline run, persisted as the `stats` block of
/// `meta.json`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PipelineResult {
    pub files: usize,
    pub symbols: usize,
    pub relationships: usize,
    pub dead_code: usize,
    pub coupled_pairs: usize,
    pub duration_secs: f64,
}

/// Invoked with the phase name and progress (0.0 at start, 1.0 at end).
pub type ProgressCallback = dyn Fn(&str, f64);

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Extra ignore patterns (gitignore syntax) applied by the walker.
    pub ignore_patterns: Vec<String>,
    /// Generate and persist TF-IDF embeddings (phase 12).
    pub embeddings: bool,
    /// How far back the git coupling pass looks.
    pub coupling_months: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            ignore_patterns: Vec::new(),
            embeddings: true,
            coupling_months: coupling::DEFAULT_MONTHS,
        }
    }
}

/// Runs the twelve ingestion phases in order and bulk-loads the result
/// into `store` (when given). Cancellation aborts between phases and at
/// per-file / per-commit / per-node granularity inside them; on
/// cancellation the store is left untouched since it is only written in
/// the final load step. Returns the populated graph and run statistics.
pub fn run_pipeline(
    cancel: &CancelToken,
    repo_path: &Path,
    store: Option<&dyn StorageBackend>,
    options: &PipelineOptions,
    progress: Option<&ProgressCallback>,
) -> Result<(KnowledgeGraph, PipelineResult)> {
    let started = Instant::now();
    let mut result = PipelineResult::default();
    let report = |phase: &str, pct: f64| {
        if let Some(cb) = progress {
            cb(phase, pct);
        }
    };

    // Phase 1: walk.
    report("Walking files", 0.0);
    let entries = walker::walk_repo(repo_path, &options.ignore_patterns, cancel)
        .context("walking repo")?;
    result.files = entries.len();
    report("Walking files", 1.0);

    let graph = KnowledgeGraph::new();

    // Phase 2: structure.
    report("Processing structure", 0.0);
    process_structure(&entries, &graph);
    report("Processing structure", 1.0);
    cancel.check()?;

    // Phase 3: parsing.
    report("Parsing code", 0.0);
    let parse_data = process_parsing(&entries, &graph, cancel)?;
    report("Parsing code", 1.0);

    // Phase 4: imports.
    report("Resolving imports", 0.0);
    process_imports(&parse_data, &graph);
    report("Resolving imports", 1.0);
    cancel.check()?;

    // Phase 5: calls.
    report("Tracing calls", 0.0);
    process_calls(&parse_data, &graph);
    report("Tracing calls", 1.0);
    cancel.check()?;

    // Phase 6: heritage.
    report("Extracting heritage", 0.0);
    process_heritage(&parse_data, &graph);
    report("Extracting heritage", 1.0);
    cancel.check()?;

    // Phase 7: types.
    report("Analyzing types", 0.0);
    process_types(&parse_data, &graph);
    report("Analyzing types", 1.0);
    cancel.check()?;

    // Phase 8: communities.
    report("Detecting communities", 0.0);
    let communities = community::detect_communities(&graph);
    debug!(communities, "community detection done");
    report("Detecting communities", 1.0);
    cancel.check()?;

    // Phase 9: execution flows.
    report("Detecting execution flows", 0.0);
    let flows = processes::detect_processes(&graph);
    debug!(flows, "flow detection done");
    report("Detecting execution flows", 1.0);
    cancel.check()?;

    // Phase 10: dead code.
    report("Detecting dead code", 0.0);
    result.dead_code = dead_code::process_dead_code(&graph);
    report("Detecting dead code", 1.0);
    cancel.check()?;

    // Phase 11: git coupling.
    report("Analyzing git history", 0.0);
    result.coupled_pairs = coupling::process_coupling(&graph, repo_path, options.coupling_months, cancel)?;
    report("Analyzing git history", 1.0);

    // Phase 12: embeddings.
    if options.embeddings {
        report("Generating embeddings", 0.0);
        if let Some(store) = store {
            if let Err(err) = crate::embeddings::generate_and_store(cancel, &graph, store) {
                if err.downcast_ref::<crate::util::Cancelled>().is_some() {
                    return Err(err);
                }
                // Embedding failure degrades search but not the graph.
                warn!(error = %err, "embedding generation failed");
            }
        }
        report("Generating embeddings", 1.0);
    }

    result.symbols = count_symbols(&graph);
    result.relationships = graph.relationship_count();

    if let Some(store) = store {
        report("Loading to storage", 0.0);
        store.bulk_load(cancel, &graph).context("bulk load")?;
        report("Loading to storage", 1.0);
    }

    result.duration_secs = started.elapsed().as_secs_f64();
    Ok((graph, result))
}

/// Phase 2: file and folder nodes plus `contains` edges along each
/// directory chain.
pub fn process_structure(entries: &[FileEntry], graph: &KnowledgeGraph) {
    for entry in entries {
        let mut file_node = GraphNode::new(NodeLabel::File, &entry.rel_path, "");
        file_node.name = base_name(&entry.rel_path).to_string();
        file_node.language = entry.language.clone();
        file_node.content = String::from_utf8_lossy(&entry.content).into_owned();
        let file_id = file_node.id.clone();
        graph.add_node(file_node);

        let Some(dir) = parent_dir(&entry.rel_path) else {
            continue;
        };
        let parts: Vec<&str> = dir.split('/').collect();
        for i in 0..parts.len() {
            let folder_path = parts[..=i].join("/");
            let mut folder_node = GraphNode::new(NodeLabel::Folder, &folder_path, "");
            folder_node.name = parts[i].to_string();
            let folder_id = folder_node.id.clone();
            graph.add_node(folder_node);

            if i > 0 {
                let parent_path = parts[..i].join("/");
                graph.add_relationship(GraphRelationship::new(
                    generate_id(NodeLabel::Folder, &folder_path, parts[i]),
                    RelType::Contains,
                    generate_id(NodeLabel::Folder, &parent_path, ""),
                    folder_id,
                ));
            }
        }

        graph.add_relationship(GraphRelationship::new(
            generate_id(NodeLabel::Folder, dir, base_name(&entry.rel_path)),
            RelType::Contains,
            generate_id(NodeLabel::Folder, dir, ""),
            file_id,
        ));
    }
}

/// Phase 3: run the language parser per file and materialise symbol
/// nodes with `defines` edges. Parser failures are recovered per file.
pub fn process_parsing(
    entries: &[FileEntry],
    graph: &KnowledgeGraph,
    cancel: &CancelToken,
) -> Result<ParseData> {
    let mut parse_data = ParseData::default();
    let mut parse_failures = 0usize;

    for entry in entries {
        cancel.check()?;
        let Some(parser) = parsers::parser_for_language(&entry.language) else {
            continue;
        };
        let result = match parser.parse(&entry.rel_path, &entry.content) {
            Ok(result) => result,
            Err(err) => {
                parse_failures += 1;
                warn!(path = %entry.rel_path, error = %err, "parse failed");
                continue;
            }
        };

        for sym in &result.symbols {
            let label = if sym.kind.is_symbol() {
                sym.kind
            } else {
                NodeLabel::Function
            };
            let mut node = GraphNode::new(label, &entry.rel_path, &sym.name);
            node.start_line = sym.start_line;
            node.end_line = sym.end_line;
            node.content = sym.content.clone();
            node.signature = sym.signature.clone();
            node.language = entry.language.clone();
            if label == NodeLabel::Method {
                node.class_name = sym.class_name.clone();
            }
            node.is_exported = sym.is_exported;
            node.decorators = sym.decorators.clone();
            let node_id = node.id.clone();
            graph.add_node(node);

            graph.add_relationship(GraphRelationship::new(
                generate_id(NodeLabel::Function, &entry.rel_path, &sym.name),
                RelType::Defines,
                generate_id(NodeLabel::File, &entry.rel_path, ""),
                node_id,
            ));
        }

        parse_data.files.insert(entry.rel_path.clone(), result);
    }

    if parse_failures > 0 {
        debug!(parse_failures, "files skipped due to parse errors");
    }
    Ok(parse_data)
}

/// Phase 4: `imports` edges between files for resolvable module paths.
pub fn process_imports(parse_data: &ParseData, graph: &KnowledgeGraph) {
    for (file_path, result) in &parse_data.files {
        let source_id = generate_id(NodeLabel::File, file_path, "");
        for imp in &result.imports {
            let Some(target_path) = find_import_target(graph, file_path, &imp.module_path) else {
                continue;
            };
            let target_id = generate_id(NodeLabel::File, &target_path, "");
            graph.add_relationship(
                GraphRelationship::new(
                    generate_id(NodeLabel::File, file_path, &imp.module_path),
                    RelType::Imports,
                    source_id.clone(),
                    target_id,
                )
                .with_property("symbols", json!(imp.symbols)),
            );
        }
    }
}

/// Phase 5: `calls` edges from each symbol to the resolved target of
/// each call site in its file. Unresolved calls are dropped.
pub fn process_calls(parse_data: &ParseData, graph: &KnowledgeGraph) {
    for (file_path, result) in &parse_data.files {
        for sym in &result.symbols {
            let source_id = generate_id(sym.kind, file_path, &sym.name);
            for call in &result.calls {
                let Some(target_id) =
                    find_symbol_target(graph, &call.name, &call.receiver, &call.package)
                else {
                    continue;
                };
                graph.add_relationship(
                    GraphRelationship::new(
                        generate_id(
                            NodeLabel::Function,
                            file_path,
                            &format!("{}->{}", sym.name, call.name),
                        ),
                        RelType::Calls,
                        source_id.clone(),
                        target_id,
                    )
                    .with_property("confidence", json!(0.8)),
                );
            }
        }
    }
}

/// Phase 6: `extends` and `implements` edges from class heritage.
pub fn process_heritage(parse_data: &ParseData, graph: &KnowledgeGraph) {
    for (file_path, result) in &parse_data.files {
        for heritage in &result.heritage {
            let source_id = generate_id(NodeLabel::Class, file_path, &heritage.class_name);
            for (bases, rel_type) in [
                (&heritage.extends, RelType::Extends),
                (&heritage.implements, RelType::Implements),
            ] {
                for base in bases {
                    let Some(target_id) = find_symbol_target(graph, base, "", "") else {
                        continue;
                    };
                    graph.add_relationship(GraphRelationship::new(
                        generate_id(
                            NodeLabel::Class,
                            file_path,
                            &format!("{}->{}", heritage.class_name, base),
                        ),
                        rel_type,
                        source_id.clone(),
                        target_id,
                    ));
                }
            }
        }
    }
}

/// Phase 7: `uses_type` edges with the annotation role.
pub fn process_types(parse_data: &ParseData, graph: &KnowledgeGraph) {
    for (file_path, result) in &parse_data.files {
        for sym in &result.symbols {
            let source_id = generate_id(sym.kind, file_path, &sym.name);
            for type_ref in &result.type_refs {
                let Some(target_id) = find_symbol_target(graph, &type_ref.name, "", "") else {
                    continue;
                };
                graph.add_relationship(
                    GraphRelationship::new(
                        generate_id(
                            NodeLabel::Function,
                            file_path,
                            &format!("{}->{}", sym.name, type_ref.name),
                        ),
                        RelType::UsesType,
                        source_id.clone(),
                        target_id,
                    )
                    .with_property("role", json!(type_ref.role)),
                );
            }
        }
    }
}

/// Resolves a call/heritage/type reference to a node ID.
///
/// Precedence: package-qualified functions (preferring files whose
/// directory matches the package's last component), then methods whose
/// class matches the receiver, then name lookup across function, class,
/// interface and type-alias labels. Candidate lists arrive sorted by
/// node ID, so ambiguous names resolve identically on every run.
pub fn find_symbol_target(
    graph: &KnowledgeGraph,
    name: &str,
    receiver: &str,
    pkg_path: &str,
) -> Option<String> {
    if !pkg_path.is_empty() {
        let functions = graph.get_nodes_by_label(NodeLabel::Function);
        let pkg_name = pkg_path.rsplit('/').next().unwrap_or(pkg_path);
        for node in &functions {
            if node.name == name {
                let dir = parent_dir(&node.file_path).unwrap_or("");
                if dir.ends_with(pkg_name) || dir.contains(pkg_name) {
                    return Some(node.id.clone());
                }
            }
        }
        if let Some(node) = functions.iter().find(|n| n.name == name) {
            return Some(node.id.clone());
        }
    }

    if !receiver.is_empty() {
        for method in graph.get_nodes_by_label(NodeLabel::Method) {
            if method.name == name && method.class_name == receiver {
                return Some(method.id);
            }
        }
    }

    for label in [
        NodeLabel::Function,
        NodeLabel::Class,
        NodeLabel::Interface,
        NodeLabel::TypeAlias,
    ] {
        if let Some(node) = graph
            .get_nodes_by_label(label)
            .into_iter()
            .find(|n| n.name == name)
        {
            return Some(node.id);
        }
    }

    None
}

const IMPORT_EXTENSIONS: &[&str] = &[".go", ".py", ".ts", ".tsx", ".js"];

/// Resolves a relative-looking module path to a file node present in
/// the graph. Absolute module paths (package imports) are left
/// unresolved without error.
pub fn find_import_target(
    graph: &KnowledgeGraph,
    source_file: &str,
    module_path: &str,
) -> Option<String> {
    if module_path.is_empty() {
        return None;
    }
    if !module_path.starts_with('.') && !module_path.starts_with('/') {
        return None;
    }

    let dir = parent_dir(source_file).unwrap_or("");
    let base = if let Some(rooted) = module_path.strip_prefix('/') {
        rooted.to_string()
    } else if module_path.contains('/') {
        resolve_relative(dir, module_path)
    } else {
        // Python-style dotted relative import: `.mod`, `..pkg.mod`.
        let dots = module_path.bytes().take_while(|b| *b == b'.').count();
        let mut anchor = dir.to_string();
        for _ in 1..dots {
            anchor = parent_dir(&anchor).unwrap_or("").to_string();
        }
        let rest = module_path[dots..].replace('.', "/");
        join_path(&anchor, &rest)
    };

    let mut candidates = vec![base.clone()];
    for ext in IMPORT_EXTENSIONS {
        candidates.push(format!("{base}{ext}"));
    }
    candidates.push(format!("{base}/index.ts"));
    candidates.push(format!("{base}/index.js"));

    candidates
        .into_iter()
        .find(|candidate| graph.contains_node(&generate_id(NodeLabel::File, candidate, "")))
}

fn resolve_relative(dir: &str, module_path: &str) -> String {
    let mut parts: Vec<&str> = if dir.is_empty() {
        Vec::new()
    } else {
        dir.split('/').collect()
    };
    for comp in module_path.split('/') {
        match comp {
            "." | "" => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn join_path(dir: &str, rest: &str) -> String {
    if dir.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        dir.to_string()
    } else {
        format!("{dir}/{rest}")
    }
}

/// Symbol nodes are functions, methods, classes, interfaces, type
/// aliases and enums.
pub fn count_symbols(graph: &KnowledgeGraph) -> usize {
    [
        NodeLabel::Function,
        NodeLabel::Method,
        NodeLabel::Class,
        NodeLabel::Interface,
        NodeLabel::TypeAlias,
        NodeLabel::Enum,
    ]
    .iter()
    .map(|label| graph.count_nodes_by_label(*label))
    .sum()
}
