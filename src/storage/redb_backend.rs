use super::fts::{FtsIndex, FtsMeta};
use super::{
    cosine_similarity, Direction, StorageBackend, StoreError, MAX_TRAVERSE_DEPTH, RRF_K,
};
use crate::graph::KnowledgeGraph;
use crate::model::{
    GraphNode, GraphRelationship, HybridSearchResult, NodeEmbedding, RelType, SearchResult,
};
use crate::util::{truncate_str_bytes, CancelToken};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::Path;

/// Single ordered keyspace; prefixes partition it by record type.
const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

const PREFIX_NODE: &str = "n:";
const PREFIX_REL: &str = "r:";
const PREFIX_INCOMING: &str = "i:in:";
const PREFIX_OUTGOING: &str = "i:out:";
const PREFIX_EMBEDDING: &str = "e:";
const PREFIX_FTS_TOKEN: &str = "fts:t:";
const PREFIX_FTS_META: &str = "fts:m:";

const DB_FILE: &str = "graph.redb";

/// redb-backed persistent store.
///
/// Key layout:
///
/// | prefix   | key body              | value                       |
/// |----------|-----------------------|-----------------------------|
/// | `n:`     | node_id               | node JSON                   |
/// | `r:`     | rel_id                | relationship JSON           |
/// | `i:out:` | `src:type:rel_id`     | rel_id                      |
/// | `i:in:`  | `tgt:type:rel_id`     | rel_id                      |
/// | `e:`     | node_id               | embedding JSON float array  |
/// | `fts:t:` | `token:node_id`       | token frequency             |
/// | `fts:m:` | node_id               | `{id,name,label,path}` JSON |
///
/// Reads tolerate dangling adjacency entries (loose referential
/// integrity); the in-memory FTS index and counters are rebuilt from
/// the `n:`/`r:` prefixes on open.
#[derive(Default)]
pub struct RedbBackend {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    db: Option<Database>,
    read_only: bool,
    node_count: usize,
    relationship_count: usize,
    fts: FtsIndex,
}

impl Inner {
    fn db(&self) -> Result<&Database> {
        self.db
            .as_ref()
            .ok_or_else(|| StoreError::NotInitialized.into())
    }

    fn writable_db(&self) -> Result<&Database> {
        if self.read_only {
            return Err(StoreError::ReadOnly.into());
        }
        self.db()
    }
}

fn node_key(node_id: &str) -> String {
    format!("{PREFIX_NODE}{node_id}")
}

fn rel_key(rel_id: &str) -> String {
    format!("{PREFIX_REL}{rel_id}")
}

fn outgoing_key(rel: &GraphRelationship) -> String {
    format!(
        "{PREFIX_OUTGOING}{}:{}:{}",
        rel.source, rel.rel_type, rel.id
    )
}

fn incoming_key(rel: &GraphRelationship) -> String {
    format!(
        "{PREFIX_INCOMING}{}:{}:{}",
        rel.target, rel.rel_type, rel.id
    )
}

fn adjacency_prefix(direction: Direction, node_id: &str) -> String {
    match direction {
        Direction::Callers => format!("{PREFIX_INCOMING}{node_id}:{}:", RelType::Calls),
        Direction::Callees => format!("{PREFIX_OUTGOING}{node_id}:{}:", RelType::Calls),
    }
}

type KvTable = redb::ReadOnlyTable<&'static str, &'static [u8]>;

/// Opens a read view of the keyspace; `None` when the table has never
/// been created (fresh read-only store).
fn open_read_table(db: &Database) -> Result<Option<KvTable>> {
    let txn = db.begin_read()?;
    match txn.open_table(KV) {
        Ok(table) => Ok(Some(table)),
        Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Visits every `(key, value)` under `prefix` in key order.
fn scan_prefix<T, F>(table: &T, prefix: &str, mut visit: F) -> Result<()>
where
    T: ReadableTable<&'static str, &'static [u8]>,
    F: FnMut(&str, &[u8]) -> Result<()>,
{
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        visit(key, value.value())?;
    }
    Ok(())
}

impl RedbBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor: initialize at `path` immediately.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let backend = Self::new();
        backend.initialize(path, read_only)?;
        Ok(backend)
    }

    fn fetch_node(table: &KvTable, node_id: &str) -> Result<Option<GraphNode>> {
        let Some(guard) = table.get(node_key(node_id).as_str())? else {
            return Ok(None);
        };
        let node = serde_json::from_slice(guard.value()).context("decoding node")?;
        Ok(Some(node))
    }

    fn fetch_relationship(table: &KvTable, rel_id: &str) -> Result<Option<GraphRelationship>> {
        let Some(guard) = table.get(rel_key(rel_id).as_str())? else {
            return Ok(None);
        };
        let rel = serde_json::from_slice(guard.value()).context("decoding relationship")?;
        Ok(Some(rel))
    }

    /// Adjacent nodes over one `calls` adjacency prefix. Entries whose
    /// relationship or endpoint record is missing are skipped.
    fn adjacent_nodes(
        table: &KvTable,
        node_id: &str,
        direction: Direction,
    ) -> Result<Vec<GraphNode>> {
        let prefix = adjacency_prefix(direction, node_id);
        let mut rel_ids = Vec::new();
        scan_prefix(table, &prefix, |_key, value| {
            rel_ids.push(String::from_utf8_lossy(value).into_owned());
            Ok(())
        })?;

        let mut nodes = Vec::new();
        for rel_id in rel_ids {
            let Some(rel) = Self::fetch_relationship(table, &rel_id)? else {
                continue;
            };
            let endpoint = match direction {
                Direction::Callers => &rel.source,
                Direction::Callees => &rel.target,
            };
            if let Some(node) = Self::fetch_node(table, endpoint)? {
                nodes.push(node);
            }
        }
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    fn snippet(node: &GraphNode) -> String {
        truncate_str_bytes(&node.content, 200).to_string()
    }

    fn result_from_node(node: &GraphNode, score: f64) -> SearchResult {
        SearchResult {
            node_id: node.id.clone(),
            score,
            node_name: node.name.clone(),
            file_path: node.file_path.clone(),
            label: node.label.as_str().to_string(),
            snippet: Self::snippet(node),
        }
    }
}

impl StorageBackend for RedbBackend {
    fn initialize(&self, path: &Path, read_only: bool) -> Result<()> {
        let mut inner = self.inner.write();

        let db_file = path.join(DB_FILE);
        let db = if read_only {
            Database::open(&db_file)
                .with_context(|| format!("opening store at {}", db_file.display()))?
        } else {
            fs::create_dir_all(path)
                .with_context(|| format!("creating index dir {}", path.display()))?;
            let db = Database::create(&db_file)
                .with_context(|| format!("creating store at {}", db_file.display()))?;
            let txn = db.begin_write()?;
            txn.open_table(KV)?;
            txn.commit()?;
            db
        };

        // Rebuild the in-memory FTS index and counters from disk.
        let mut fts = FtsIndex::new();
        let mut node_count = 0;
        let mut relationship_count = 0;
        if let Some(table) = open_read_table(&db)? {
            scan_prefix(&table, PREFIX_NODE, |_key, value| {
                if let Ok(node) = serde_json::from_slice::<GraphNode>(value) {
                    fts.index_node(&node);
                    node_count += 1;
                }
                Ok(())
            })?;
            scan_prefix(&table, PREFIX_REL, |_key, _value| {
                relationship_count += 1;
                Ok(())
            })?;
        }

        inner.db = Some(db);
        inner.read_only = read_only;
        inner.fts = fts;
        inner.node_count = node_count;
        inner.relationship_count = relationship_count;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.db = None;
        inner.fts.clear();
        inner.node_count = 0;
        inner.relationship_count = 0;
        Ok(())
    }

    fn bulk_load(&self, cancel: &CancelToken, graph: &KnowledgeGraph) -> Result<()> {
        let mut inner = self.inner.write();

        let mut nodes = graph.iter_nodes();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut rels = graph.iter_relationships();
        rels.sort_by(|a, b| a.id.cmp(&b.id));

        let mut fts = FtsIndex::new();
        {
            let db = inner.writable_db()?;
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(KV)?;
                for node in &nodes {
                    cancel.check()?;
                    let data = serde_json::to_vec(node).context("encoding node")?;
                    table.insert(node_key(&node.id).as_str(), data.as_slice())?;

                    let counts = fts.index_node(node);
                    for (token, freq) in counts {
                        let key = format!("{PREFIX_FTS_TOKEN}{token}:{}", node.id);
                        table.insert(key.as_str(), freq.to_string().as_bytes())?;
                    }
                    let meta = serde_json::to_vec(&FtsMeta::from_node(node))?;
                    let meta_key = format!("{PREFIX_FTS_META}{}", node.id);
                    table.insert(meta_key.as_str(), meta.as_slice())?;
                }
                for rel in &rels {
                    cancel.check()?;
                    let data = serde_json::to_vec(rel).context("encoding relationship")?;
                    table.insert(rel_key(&rel.id).as_str(), data.as_slice())?;
                    table.insert(outgoing_key(rel).as_str(), rel.id.as_bytes())?;
                    table.insert(incoming_key(rel).as_str(), rel.id.as_bytes())?;
                }
            }
            write_txn.commit().context("committing bulk load")?;
        }

        inner.fts = fts;
        inner.node_count = nodes.len();
        inner.relationship_count = rels.len();
        Ok(())
    }

    fn add_nodes(&self, cancel: &CancelToken, nodes: &[GraphNode]) -> Result<()> {
        let mut inner = self.inner.write();
        let mut added = 0;
        {
            let db = inner.writable_db()?;
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(KV)?;
                for node in nodes {
                    cancel.check()?;
                    let key = node_key(&node.id);
                    if table.get(key.as_str())?.is_none() {
                        added += 1;
                    }
                    let data = serde_json::to_vec(node).context("encoding node")?;
                    table.insert(key.as_str(), data.as_slice())?;

                    let counts = super::fts::node_token_counts(node);
                    for (token, freq) in counts {
                        let token_key = format!("{PREFIX_FTS_TOKEN}{token}:{}", node.id);
                        table.insert(token_key.as_str(), freq.to_string().as_bytes())?;
                    }
                    let meta = serde_json::to_vec(&FtsMeta::from_node(node))?;
                    let meta_key = format!("{PREFIX_FTS_META}{}", node.id);
                    table.insert(meta_key.as_str(), meta.as_slice())?;
                }
            }
            write_txn.commit().context("committing node insert")?;
        }

        for node in nodes {
            inner.fts.index_node(node);
        }
        inner.node_count += added;
        Ok(())
    }

    fn add_relationships(&self, cancel: &CancelToken, rels: &[GraphRelationship]) -> Result<()> {
        let mut inner = self.inner.write();
        let mut added = 0;
        {
            let db = inner.writable_db()?;
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(KV)?;
                for rel in rels {
                    cancel.check()?;
                    let key = rel_key(&rel.id);
                    if table.get(key.as_str())?.is_none() {
                        added += 1;
                    }
                    let data = serde_json::to_vec(rel).context("encoding relationship")?;
                    table.insert(key.as_str(), data.as_slice())?;
                    table.insert(outgoing_key(rel).as_str(), rel.id.as_bytes())?;
                    table.insert(incoming_key(rel).as_str(), rel.id.as_bytes())?;
                }
            }
            write_txn.commit().context("committing relationship insert")?;
        }
        inner.relationship_count += added;
        Ok(())
    }

    fn remove_nodes_by_file(&self, cancel: &CancelToken, file_path: &str) -> Result<usize> {
        let mut inner = self.inner.write();
        let mut victims: Vec<String> = Vec::new();
        let mut removed_rels = 0;
        {
            let db = inner.writable_db()?;
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(KV)?;

                scan_prefix(&table, PREFIX_NODE, |_key, value| {
                    if let Ok(node) = serde_json::from_slice::<GraphNode>(value) {
                        if node.file_path == file_path {
                            victims.push(node.id);
                        }
                    }
                    Ok(())
                })?;

                let mut keys_to_delete: Vec<String> = Vec::new();
                let mut rel_ids: HashSet<String> = HashSet::new();
                for node_id in &victims {
                    cancel.check()?;
                    keys_to_delete.push(node_key(node_id));
                    keys_to_delete.push(format!("{PREFIX_FTS_META}{node_id}"));

                    // The only partial cascade: calls adjacency entries
                    // and the relationships they reference.
                    for direction in [Direction::Callers, Direction::Callees] {
                        let prefix = adjacency_prefix(direction, node_id);
                        scan_prefix(&table, &prefix, |key, value| {
                            keys_to_delete.push(key.to_string());
                            rel_ids.insert(String::from_utf8_lossy(value).into_owned());
                            Ok(())
                        })?;
                    }
                }
                for rel_id in &rel_ids {
                    keys_to_delete.push(rel_key(rel_id));
                }

                // Token entries end in `:<node_id>`; a prefix scan over
                // the whole token space finds them (suffix match).
                let victim_set: HashSet<&String> = victims.iter().collect();
                scan_prefix(&table, PREFIX_FTS_TOKEN, |key, _value| {
                    if let Some(idx) = key.rfind(':') {
                        let node_id = key[idx + 1..].to_string();
                        if victim_set.contains(&node_id) {
                            keys_to_delete.push(key.to_string());
                        }
                    }
                    Ok(())
                })?;

                for key in &keys_to_delete {
                    if table.remove(key.as_str())?.is_some() && key.starts_with(PREFIX_REL) {
                        removed_rels += 1;
                    }
                }
            }
            write_txn.commit().context("committing removal")?;
        }

        for node_id in &victims {
            inner.fts.remove_node(node_id);
        }
        inner.node_count = inner.node_count.saturating_sub(victims.len());
        inner.relationship_count = inner.relationship_count.saturating_sub(removed_rels);
        Ok(victims.len())
    }

    fn get_node(&self, _cancel: &CancelToken, node_id: &str) -> Result<Option<GraphNode>> {
        let inner = self.inner.read();
        let Some(table) = open_read_table(inner.db()?)? else {
            return Ok(None);
        };
        Self::fetch_node(&table, node_id)
    }

    fn get_nodes_by_label(&self, cancel: &CancelToken, label: &str) -> Result<Vec<GraphNode>> {
        let inner = self.inner.read();
        let Some(table) = open_read_table(inner.db()?)? else {
            return Ok(Vec::new());
        };
        let mut nodes = Vec::new();
        scan_prefix(&table, PREFIX_NODE, |_key, value| {
            cancel.check()?;
            if let Ok(node) = serde_json::from_slice::<GraphNode>(value) {
                if node.label.as_str() == label {
                    nodes.push(node);
                }
            }
            Ok(())
        })?;
        Ok(nodes)
    }

    fn get_callers(&self, _cancel: &CancelToken, node_id: &str) -> Result<Vec<GraphNode>> {
        let inner = self.inner.read();
        let Some(table) = open_read_table(inner.db()?)? else {
            return Ok(Vec::new());
        };
        Self::adjacent_nodes(&table, node_id, Direction::Callers)
    }

    fn get_callees(&self, _cancel: &CancelToken, node_id: &str) -> Result<Vec<GraphNode>> {
        let inner = self.inner.read();
        let Some(table) = open_read_table(inner.db()?)? else {
            return Ok(Vec::new());
        };
        Self::adjacent_nodes(&table, node_id, Direction::Callees)
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
        let Some(table) = open_read_table(inner.db()?)? else {
            return Ok(Vec::new());
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut result = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(start_id.to_string(), 0)]);

        while let Some((current, current_depth)) = queue.pop_front() {
            cancel.check()?;
            if !visited.insert(current.clone()) {
                continue;
            }
            if current != start_id {
                if let Some(node) = Self::fetch_node(&table, &current)? {
                    result.push(node);
                }
            }
            if current_depth < depth {
                for neighbour in Self::adjacent_nodes(&table, &current, direction)? {
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
        let scored = inner.fts.search(query, limit);
        if scored.is_empty() {
            return Ok(Vec::new());
        }
        let Some(table) = open_read_table(inner.db()?)? else {
            return Ok(Vec::new());
        };

        let mut results = Vec::with_capacity(scored.len());
        for (node_id, score) in scored {
            let Some(node) = Self::fetch_node(&table, &node_id)? else {
                continue;
            };
            results.push(Self::result_from_node(&node, score));
        }
        Ok(results)
    }

    fn vector_search(
        &self,
        cancel: &CancelToken,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let inner = self.inner.read();
        let Some(table) = open_read_table(inner.db()?)? else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(String, f64)> = Vec::new();
        scan_prefix(&table, PREFIX_EMBEDDING, |key, value| {
            cancel.check()?;
            let Ok(embedding) = serde_json::from_slice::<Vec<f32>>(value) else {
                return Ok(());
            };
            let similarity = cosine_similarity(vector, &embedding);
            if similarity > 0.0 {
                scored.push((key[PREFIX_EMBEDDING.len()..].to_string(), similarity));
            }
            Ok(())
        })?;

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);

        let mut results = Vec::with_capacity(scored.len());
        for (node_id, score) in scored {
            let Some(node) = Self::fetch_node(&table, &node_id)? else {
                continue;
            };
            results.push(Self::result_from_node(&node, score));
        }
        Ok(results)
    }

    fn store_embeddings(&self, cancel: &CancelToken, embeddings: &[NodeEmbedding]) -> Result<()> {
        let inner = self.inner.write();
        let db = inner.writable_db()?;
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV)?;
            for embedding in embeddings {
                cancel.check()?;
                let data = serde_json::to_vec(&embedding.embedding)?;
                let key = format!("{PREFIX_EMBEDDING}{}", embedding.node_id);
                table.insert(key.as_str(), data.as_slice())?;
            }
        }
        write_txn.commit().context("committing embeddings")
    }

    fn get_dead_code(&self, cancel: &CancelToken) -> Result<Vec<GraphNode>> {
        let inner = self.inner.read();
        let Some(table) = open_read_table(inner.db()?)? else {
            return Ok(Vec::new());
        };
        let mut dead = Vec::new();
        scan_prefix(&table, PREFIX_NODE, |_key, value| {
            cancel.check()?;
            if let Ok(node) = serde_json::from_slice::<GraphNode>(value) {
                if node.is_dead {
                    dead.push(node);
                }
            }
            Ok(())
        })?;
        Ok(dead)
    }

    fn rebuild_fts_indexes(&self, cancel: &CancelToken) -> Result<()> {
        let mut inner = self.inner.write();
        let mut fts = FtsIndex::new();
        {
            let db = inner.writable_db()?;
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(KV)?;

                let mut stale_keys: Vec<String> = Vec::new();
                for prefix in [PREFIX_FTS_TOKEN, PREFIX_FTS_META] {
                    scan_prefix(&table, prefix, |key, _value| {
                        stale_keys.push(key.to_string());
                        Ok(())
                    })?;
                }
                for key in &stale_keys {
                    table.remove(key.as_str())?;
                }

                let mut nodes: Vec<GraphNode> = Vec::new();
                scan_prefix(&table, PREFIX_NODE, |_key, value| {
                    cancel.check()?;
                    if let Ok(node) = serde_json::from_slice::<GraphNode>(value) {
                        nodes.push(node);
                    }
                    Ok(())
                })?;
                for node in &nodes {
                    let counts = fts.index_node(node);
                    for (token, freq) in counts {
                        let key = format!("{PREFIX_FTS_TOKEN}{token}:{}", node.id);
                        table.insert(key.as_str(), freq.to_string().as_bytes())?;
                    }
                    let meta = serde_json::to_vec(&FtsMeta::from_node(node))?;
                    let meta_key = format!("{PREFIX_FTS_META}{}", node.id);
                    table.insert(meta_key.as_str(), meta.as_slice())?;
                }
            }
            write_txn.commit().context("committing fts rebuild")?;
        }
        inner.fts = fts;
        Ok(())
    }

    fn node_count(&self) -> usize {
        self.inner.read().node_count
    }

    fn relationship_count(&self) -> usize {
        self.inner.read().relationship_count
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
