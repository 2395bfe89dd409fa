use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLabel {
    File,
    Folder,
    Function,
    Method,
    Class,
    Interface,
    TypeAlias,
    Enum,
    Community,
    Process,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::File => "file",
            NodeLabel::Folder => "folder",
            NodeLabel::Function => "function",
            NodeLabel::Method => "method",
            NodeLabel::Class => "class",
            NodeLabel::Interface => "interface",
            NodeLabel::TypeAlias => "type_alias",
            NodeLabel::Enum => "enum",
            NodeLabel::Community => "community",
            NodeLabel::Process => "process",
        }
    }

    /// Labels that count as symbols (callable or type-level entities).
    pub fn is_symbol(&self) -> bool {
        matches!(
            self,
            NodeLabel::Function
                | NodeLabel::Method
                | NodeLabel::Class
                | NodeLabel::Interface
                | NodeLabel::TypeAlias
                | NodeLabel::Enum
        )
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a directed relationship between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelType {
    Contains,
    Defines,
    Calls,
    Imports,
    Extends,
    Implements,
    MemberOf,
    StepInProcess,
    UsesType,
    Exports,
    CoupledWith,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Contains => "contains",
            RelType::Defines => "defines",
            RelType::Calls => "calls",
            RelType::Imports => "imports",
            RelType::Extends => "extends",
            RelType::Implements => "implements",
            RelType::MemberOf => "member_of",
            RelType::StepInProcess => "step_in_process",
            RelType::UsesType => "uses_type",
            RelType::Exports => "exports",
            RelType::CoupledWith => "coupled_with",
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the knowledge graph.
///
/// The ID is the deterministic string `{label}:{file_path}[:{symbol}]`
/// produced by [`generate_id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: NodeLabel,
    pub name: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub start_line: i64,
    #[serde(default)]
    pub end_line: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub language: String,
    /// Parent class name, carried for methods only.
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub is_dead: bool,
    #[serde(default)]
    pub is_entry_point: bool,
    #[serde(default)]
    pub is_exported: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl GraphNode {
    pub fn new(label: NodeLabel, file_path: &str, name: &str) -> Self {
        GraphNode {
            id: generate_id(label, file_path, name),
            label,
            name: name.to_string(),
            file_path: file_path.to_string(),
            start_line: 0,
            end_line: 0,
            content: String::new(),
            signature: String::new(),
            language: String::new(),
            class_name: String::new(),
            is_dead: false,
            is_entry_point: false,
            is_exported: false,
            decorators: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn set_property(&mut self, key: &str, value: Value) {
        self.properties.insert(key.to_string(), value);
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn property_bool(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A directed edge in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub id: String,
    #[serde(rename = "type")]
    pub rel_type: RelType,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl GraphRelationship {
    pub fn new(id: String, rel_type: RelType, source: String, target: String) -> Self {
        GraphRelationship {
            id,
            rel_type,
            source,
            target,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }
}

/// Builds the deterministic node ID `{label}:{file_path}[:{symbol}]`.
pub fn generate_id(label: NodeLabel, file_path: &str, symbol_name: &str) -> String {
    if symbol_name.is_empty() {
        format!("{}:{}", label.as_str(), file_path)
    } else {
        format!("{}:{}:{}", label.as_str(), file_path, symbol_name)
    }
}

/// Result row from FTS or vector search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub node_id: String,
    pub score: f64,
    pub node_name: String,
    pub file_path: String,
    pub label: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub snippet: String,
}

/// Result row from RRF-fused hybrid search.
#[derive(Debug, Clone, Serialize)]
pub struct HybridSearchResult {
    pub node_id: String,
    pub score: f64,
    pub node_name: String,
    pub file_path: String,
    pub label: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub snippet: String,
}

/// A dense vector paired with the node it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEmbedding {
    pub node_id: String,
    pub embedding: Vec<f32>,
}
