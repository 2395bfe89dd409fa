use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "axon",
    version,
    about = "Code knowledge-graph indexer",
    after_help = r#"Examples:
  axon index --repo .
  axon query --repo . "user service" --limit 10
  axon impact --repo . function:src/auth.go:Login --depth 3
  axon dead-code --repo .
  axon stats --repo .
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the ingestion pipeline and persist the graph.
    Index {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Extra ignore patterns (gitignore syntax).
        #[arg(long = "ignore")]
        ignore_patterns: Vec<String>,
        /// Skip embedding generation.
        #[arg(long)]
        no_embeddings: bool,
        /// Months of git history for the coupling analysis.
        #[arg(long, default_value_t = 6)]
        coupling_months: u32,
    },
    /// Hybrid search over the persisted graph.
    Query {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        query: String,
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
    },
    /// Blast radius: callers reachable from a symbol, up to a depth.
    Impact {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Node ID, e.g. function:src/auth.go:Login.
        node_id: String,
        #[arg(long, default_value_t = 3)]
        depth: usize,
    },
    /// List symbols flagged as dead code.
    DeadCode {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Print the stats recorded by the last index run.
    Stats {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
}
