use anyhow::{bail, Result};
use axon::storage::Direction;
use axon::{cli, ingest, meta, CancelToken, RedbBackend, StorageBackend};
use clap::Parser;
use serde_json::json;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn store_path(repo: &Path) -> std::path::PathBuf {
    meta::index_dir(repo).join("redb")
}

fn open_store(repo: &Path, read_only: bool) -> Result<RedbBackend> {
    RedbBackend::open(&store_path(repo), read_only)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let cancel = CancelToken::new();

    match args.command {
        cli::Command::Index {
            repo,
            ignore_patterns,
            no_embeddings,
            coupling_months,
        } => {
            let store = open_store(&repo, false)?;
            let options = ingest::PipelineOptions {
                ignore_patterns,
                embeddings: !no_embeddings,
                coupling_months,
            };
            let progress = |phase: &str, pct: f64| {
                eprintln!("{phase} ({:.0}%)", pct * 100.0);
            };
            let (_graph, result) =
                ingest::run_pipeline(&cancel, &repo, Some(&store), &options, Some(&progress))?;
            meta::write_meta(&repo, &result)?;
            store.close()?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::Query { repo, query, limit } => {
            let store = open_store(&repo, true)?;
            // Query vectors only make sense against the corpus
            // vocabulary; text-side retrieval alone feeds the fusion.
            let results = store.hybrid_search(&cancel, &query, &[], limit)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        cli::Command::Impact {
            repo,
            node_id,
            depth,
        } => {
            let store = open_store(&repo, true)?;
            if store.get_node(&cancel, &node_id)?.is_none() {
                bail!("no such node: {node_id}");
            }
            let callers = store.traverse(&cancel, &node_id, depth, Direction::Callers)?;
            println!("{}", serde_json::to_string_pretty(&callers)?);
            Ok(())
        }
        cli::Command::DeadCode { repo } => {
            let store = open_store(&repo, true)?;
            let dead = store.get_dead_code(&cancel)?;
            let rows: Vec<_> = dead
                .iter()
                .map(|node| {
                    json!({
                        "id": node.id,
                        "name": node.name,
                        "file_path": node.file_path,
                        "label": node.label,
                        "confidence": node.property_str("dead_code_confidence"),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
        cli::Command::Stats { repo } => match meta::read_meta(&repo)? {
            Some(meta) => {
                println!("{}", serde_json::to_string_pretty(&meta)?);
                Ok(())
            }
            None => bail!("no index found at {}; run `axon index` first", repo.display()),
        },
    }
}
