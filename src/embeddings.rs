use crate::graph::KnowledgeGraph;
use crate::model::{GraphNode, NodeEmbedding};
use crate::storage::StorageBackend;
use crate::util::{truncate_str_bytes, CancelToken};
use anyhow::Result;
use std::collections::HashMap;

/// Dimension of every generated embedding. Vocabulary terms past this
/// cap are ignored; the truncation is intentional.
pub const EMBEDDING_DIMENSION: usize = 100;

/// Two-pass TF-IDF embedder over node description texts.
///
/// Pass 1 assigns the first `EMBEDDING_DIMENSION` distinct terms a
/// contiguous vector index; pass 2 computes `idf = ln(N / df)`. Each
/// document then embeds as the max-TF-normalised TF-IDF vector,
/// L2-normalised, with NaN/Inf components zeroed.
#[derive(Default)]
pub struct TfIdfEmbedder {
    idf: HashMap<String, f64>,
    vocab: HashMap<String, usize>,
    doc_count: usize,
}

impl TfIdfEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_vocabulary(&mut self, docs: &[String]) {
        let mut term_index = self.vocab.len();
        'docs: for doc in docs {
            let mut seen = std::collections::HashSet::new();
            for term in tokenize(doc) {
                if seen.insert(term.clone()) && !self.vocab.contains_key(&term) {
                    self.vocab.insert(term, term_index);
                    term_index += 1;
                    if term_index >= EMBEDDING_DIMENSION {
                        break 'docs;
                    }
                }
            }
        }
        self.doc_count = docs.len();
    }

    pub fn compute_idf(&mut self, docs: &[String]) {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in docs {
            let mut seen = std::collections::HashSet::new();
            for term in tokenize(doc) {
                if seen.insert(term.clone()) {
                    *doc_freq.entry(term).or_insert(0) += 1;
                }
            }
        }
        for (term, df) in doc_freq {
            if df > 0 {
                self.idf
                    .insert(term, (self.doc_count as f64 / df as f64).ln());
            }
        }
    }

    pub fn embed(&self, doc: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; EMBEDDING_DIMENSION];

        let mut tf: HashMap<String, usize> = HashMap::new();
        for term in tokenize(doc) {
            *tf.entry(term).or_insert(0) += 1;
        }
        let max_tf = tf.values().copied().max().unwrap_or(0) as f64;
        if max_tf == 0.0 {
            return embedding;
        }

        for (term, count) in &tf {
            let Some(&idx) = self.vocab.get(term) else {
                continue;
            };
            let normalized_tf = *count as f64 / max_tf;
            // Unseen terms default to an IDF of 1.
            let idf = self.idf.get(term).copied().unwrap_or(1.0);
            embedding[idx] = (normalized_tf * idf) as f32;
        }

        let norm = embedding
            .iter()
            .map(|v| (*v as f64) * (*v as f64))
            .sum::<f64>()
            .sqrt();
        if norm > 0.0 && norm.is_finite() {
            for value in embedding.iter_mut() {
                let scaled = *value / norm as f32;
                *value = if scaled.is_finite() { scaled } else { 0.0 };
            }
        }

        embedding
    }

    pub fn embed_node(&self, node: &GraphNode) -> Vec<f32> {
        self.embed(&embedding_text(node))
    }

    /// Builds the vocabulary and IDF table from all nodes, then embeds
    /// each of them.
    pub fn embed_nodes(&mut self, nodes: &[GraphNode]) -> Vec<Vec<f32>> {
        let docs: Vec<String> = nodes.iter().map(embedding_text).collect();
        self.build_vocabulary(&docs);
        self.compute_idf(&docs);
        docs.iter().map(|doc| self.embed(doc)).collect()
    }
}

/// Canonical text rendered for a node:
/// `<label> <name>. in file <path>. Signature: <sig>. Code: <first 500
/// chars>. Method of class <class>.` with absent fields omitted.
pub fn embedding_text(node: &GraphNode) -> String {
    let mut parts = vec![format!("{} {}", node.label, node.name)];
    if !node.file_path.is_empty() {
        parts.push(format!("in file {}", node.file_path));
    }
    if !node.signature.is_empty() {
        parts.push(format!("Signature: {}", node.signature));
    }
    if !node.content.is_empty() {
        parts.push(format!("Code: {}", truncate_str_bytes(&node.content, 500)));
    }
    if !node.class_name.is_empty() {
        parts.push(format!("Method of class {}", node.class_name));
    }
    parts.join(". ")
}

/// Lowercased alphanumeric terms of length >= 2.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|term| term.len() >= 2)
        .map(str::to_string)
        .collect()
}

/// Phase 12: embed every node in the graph and hand the vectors to the
/// storage backend. Honours cancellation per node.
pub fn generate_and_store(
    cancel: &CancelToken,
    graph: &KnowledgeGraph,
    store: &dyn StorageBackend,
) -> Result<()> {
    let mut nodes = graph.iter_nodes();
    if nodes.is_empty() {
        return Ok(());
    }
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut embedder = TfIdfEmbedder::new();
    let docs: Vec<String> = nodes.iter().map(embedding_text).collect();
    embedder.build_vocabulary(&docs);
    embedder.compute_idf(&docs);

    let mut embeddings = Vec::with_capacity(nodes.len());
    for (node, doc) in nodes.iter().zip(&docs) {
        cancel.check()?;
        embeddings.push(NodeEmbedding {
            node_id: node.id.clone(),
            embedding: embedder.embed(doc),
        });
    }

    store.store_embeddings(cancel, &embeddings)
}
