//! Command-line surface: `wbgrep index|watch|query`, parsed with clap's
//! derive API and environment-variable fallbacks.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "wbgrep", about = "Incremental code indexing and semantic retrieval", version)]
pub struct Cli {
    /// Repository root to operate on. Defaults to the current directory.
    #[arg(long, global = true, env = "WBGREP_ROOT", default_value = ".")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Walk the repository and bring the vector index up to date.
    Index {
        /// Re-chunk and re-embed every file, even if its content hash
        /// hasn't changed since the last run.
        #[arg(long)]
        force: bool,
        /// Drop the existing index and journal before indexing.
        #[arg(long)]
        clear: bool,
    },
    /// Index once, then watch the repository for changes until interrupted.
    Watch {
        #[arg(long)]
        force: bool,
    },
    /// Run a natural-language query against the index.
    Query {
        /// The natural-language query text.
        text: String,
        /// Maximum number of results to return.
        #[arg(short = 'k', long, default_value_t = 10)]
        limit: usize,
        /// Restrict results to chunks whose relative path starts with this prefix.
        #[arg(long)]
        path_prefix: Option<String>,
    },
    /// Print chunk and file counts currently in the index.
    Stats,
}
