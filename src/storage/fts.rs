use crate::model::GraphNode;
use crate::util::truncate_str_bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Indexed fields take at most this many content bytes.
const CONTENT_INDEX_BYTES: usize = 500;

/// Splits code-ish text into searchable tokens:
///
/// 1. the whole text lowercased as one token,
/// 2. segments split on `_`, `.`, `-` and whitespace,
/// 3. camelCase words (`UserService` -> `user`, `service`),
/// 4. letter/digit boundaries (`http2` -> `http`, `2`),
/// 5. deduplicated, empties discarded.
pub fn tokenize(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut tokens = Vec::new();
    let mut push = |token: String| {
        if !token.is_empty() && seen.insert(token.clone()) {
            tokens.push(token);
        }
    };

    push(text.to_lowercase());

    for part in text.split(['_', '.', '-', ' ', '\t', '\n', '\r']) {
        push(part.to_lowercase());
    }

    for part in split_camel(text) {
        push(part.to_lowercase());
    }

    for part in split_number_boundaries(text) {
        push(part.to_lowercase());
    }

    tokens
}

/// Inserts boundaries between a lowercase letter and the following
/// uppercase letter, then splits on the separators as well so embedded
/// words surface from identifiers like `parse_UserName`.
fn split_camel(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in text.chars() {
        if ch.is_uppercase() && prev_lower {
            out.push(std::mem::take(&mut current));
        }
        if ch.is_alphanumeric() {
            current.push(ch);
            prev_lower = ch.is_lowercase();
        } else {
            out.push(std::mem::take(&mut current));
            prev_lower = false;
        }
    }
    out.push(current);
    out.into_iter().filter(|s| !s.is_empty()).collect()
}

fn split_number_boundaries(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;
    for ch in text.chars() {
        if let Some(prev_ch) = prev {
            let boundary = (prev_ch.is_ascii_alphabetic() && ch.is_ascii_digit())
                || (prev_ch.is_ascii_digit() && ch.is_ascii_alphabetic());
            if boundary {
                out.push(std::mem::take(&mut current));
            }
        }
        if ch.is_alphanumeric() {
            current.push(ch);
            prev = Some(ch);
        } else {
            out.push(std::mem::take(&mut current));
            prev = None;
        }
    }
    out.push(current);
    out.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Metadata stored beside the token index, serialised as the
/// `fts:m:` JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsMeta {
    pub id: String,
    pub name: String,
    pub label: String,
    pub path: String,
}

impl FtsMeta {
    pub fn from_node(node: &GraphNode) -> Self {
        FtsMeta {
            id: node.id.clone(),
            name: node.name.clone(),
            label: node.label.as_str().to_string(),
            path: node.file_path.clone(),
        }
    }
}

/// Token occurrence counts for one node over the indexed fields: name,
/// signature, and the first 500 bytes of content. Tokens are
/// deduplicated per field, so a token's count is the number of fields
/// it appears in.
pub fn node_token_counts(node: &GraphNode) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for field in [
        node.name.as_str(),
        node.signature.as_str(),
        truncate_str_bytes(&node.content, CONTENT_INDEX_BYTES),
    ] {
        for token in tokenize(field) {
            *counts.entry(token).or_insert(0) += 1;
        }
    }
    counts
}

/// Inverted token index held in memory: token -> node -> frequency.
/// Rebuilt from the persisted node records on open and kept in sync by
/// the backend's write paths.
#[derive(Debug, Default)]
pub struct FtsIndex {
    tokens: HashMap<String, HashMap<String, usize>>,
    meta: HashMap<String, FtsMeta>,
}

impl FtsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.meta.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Indexes (or re-indexes) one node and returns its token counts so
    /// the caller can persist the `fts:t:` entries.
    pub fn index_node(&mut self, node: &GraphNode) -> HashMap<String, usize> {
        self.remove_node(&node.id);
        let counts = node_token_counts(node);
        for (token, freq) in &counts {
            self.tokens
                .entry(token.clone())
                .or_default()
                .insert(node.id.clone(), *freq);
        }
        self.meta.insert(node.id.clone(), FtsMeta::from_node(node));
        counts
    }

    pub fn remove_node(&mut self, node_id: &str) {
        self.meta.remove(node_id);
        self.tokens.retain(|_, nodes| {
            nodes.remove(node_id);
            !nodes.is_empty()
        });
    }

    pub fn meta(&self, node_id: &str) -> Option<&FtsMeta> {
        self.meta.get(node_id)
    }

    /// Accumulated term-frequency scores for the query tokens, sorted
    /// descending and truncated to `limit`.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(String, f64)> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scores: HashMap<&str, f64> = HashMap::new();
        for token in &query_tokens {
            if let Some(nodes) = self.tokens.get(token) {
                for (node_id, freq) in nodes {
                    *scores.entry(node_id.as_str()).or_insert(0.0) += *freq as f64;
                }
            }
        }

        let mut scored: Vec<(String, f64)> = scores
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeLabel;

    fn tokens(text: &str) -> Vec<String> {
        let mut t = tokenize(text);
        t.sort();
        t
    }

    #[test]
    fn whole_text_is_a_token() {
        assert!(tokens("UserService").contains(&"userservice".to_string()));
    }

    #[test]
    fn separator_split() {
        let t = tokens("parse_user.name-v2");
        assert!(t.contains(&"parse".to_string()));
        assert!(t.contains(&"user".to_string()));
        assert!(t.contains(&"name".to_string()));
        assert!(t.contains(&"v2".to_string()));
    }

    #[test]
    fn camel_case_split() {
        let t = tokens("UserService");
        assert!(t.contains(&"user".to_string()));
        assert!(t.contains(&"service".to_string()));
    }

    #[test]
    fn number_boundary_split() {
        let t = tokens("http2server");
        assert!(t.contains(&"http".to_string()));
        assert!(t.contains(&"2".to_string()));
        assert!(t.contains(&"server".to_string()));
    }

    #[test]
    fn deduplicates_and_drops_empty() {
        let t = tokenize("user user__user");
        let unique: std::collections::HashSet<&String> = t.iter().collect();
        assert_eq!(t.len(), unique.len());
        assert!(!t.iter().any(|s| s.is_empty()));
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn index_and_search_by_camel_fragment() {
        let mut index = FtsIndex::new();
        let mut user_service = GraphNode::new(NodeLabel::Class, "svc.ts", "UserService");
        user_service.signature = "class UserService".to_string();
        let mut parse_user = GraphNode::new(NodeLabel::Function, "util.ts", "parseUser");
        parse_user.signature = "function parseUser(raw: string)".to_string();
        let helper = GraphNode::new(NodeLabel::Function, "util.ts", "helper");

        index.index_node(&user_service);
        index.index_node(&parse_user);
        index.index_node(&helper);

        let hits = index.search("user", 10);
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert!(ids.contains(&user_service.id.as_str()));
        assert!(ids.contains(&parse_user.id.as_str()));
        assert!(!ids.contains(&helper.id.as_str()));
    }

    #[test]
    fn reindex_replaces_old_tokens() {
        let mut index = FtsIndex::new();
        let mut node = GraphNode::new(NodeLabel::Function, "a.go", "oldName");
        index.index_node(&node);
        assert!(!index.search("oldname", 10).is_empty());

        node.name = "newName".to_string();
        index.index_node(&node);
        assert!(index.search("oldname", 10).is_empty());
        assert!(!index.search("newname", 10).is_empty());
    }

    #[test]
    fn remove_node_clears_tokens_and_meta() {
        let mut index = FtsIndex::new();
        let node = GraphNode::new(NodeLabel::Function, "a.go", "target");
        index.index_node(&node);
        index.remove_node(&node.id);
        assert!(index.search("target", 10).is_empty());
        assert!(index.meta(&node.id).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn search_scores_sum_across_query_tokens() {
        let mut index = FtsIndex::new();
        let mut both = GraphNode::new(NodeLabel::Function, "a.go", "readFile");
        both.signature = "readFile(path string)".to_string();
        let read_only = GraphNode::new(NodeLabel::Function, "b.go", "read");
        index.index_node(&both);
        index.index_node(&read_only);

        let hits = index.search("read file", 10);
        assert_eq!(hits[0].0, both.id);
        assert!(hits[0].1 > hits[1].1);
    }
}
