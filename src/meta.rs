use crate::ingest::PipelineResult;
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Name of the hidden index directory kept under the repository root.
pub const INDEX_DIR: &str = ".axon";

const META_FILE: &str = "meta.json";

/// Contents of `.axon/meta.json`, written after a successful pipeline
/// run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub version: String,
    pub name: String,
    pub path: String,
    pub stats: IndexStats,
    /// RFC-3339 UTC timestamp.
    pub indexed_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files: usize,
    pub symbols: usize,
    pub relationships: usize,
    pub dead_code: usize,
    pub coupled_pairs: usize,
    pub duration_secs: f64,
}

impl From<&PipelineResult> for IndexStats {
    fn from(result: &PipelineResult) -> Self {
        IndexStats {
            files: result.files,
            symbols: result.symbols,
            relationships: result.relationships,
            dead_code: result.dead_code,
            coupled_pairs: result.coupled_pairs,
            duration_secs: result.duration_secs,
        }
    }
}

/// Path of the index directory for a repository.
pub fn index_dir(repo_path: &Path) -> std::path::PathBuf {
    repo_path.join(INDEX_DIR)
}

/// Writes `.axon/meta.json`, creating the index directory if needed.
pub fn write_meta(repo_path: &Path, result: &PipelineResult) -> Result<IndexMeta> {
    let dir = index_dir(repo_path);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let meta = IndexMeta {
        version: env!("CARGO_PKG_VERSION").to_string(),
        name: repo_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string()),
        path: repo_path.to_string_lossy().into_owned(),
        stats: IndexStats::from(result),
        indexed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };

    let path = dir.join(META_FILE);
    let data = serde_json::to_vec_pretty(&meta)?;
    fs::write(&path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(meta)
}

/// Reads `.axon/meta.json` back, if present.
pub fn read_meta(repo_path: &Path) -> Result<Option<IndexMeta>> {
    let path = index_dir(repo_path).join(META_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let meta = serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(meta))
}
