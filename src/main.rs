//! # Tome CLI
//!
//! The `tome` binary answers questions about a book catalog using
//! retrieval-augmented generation.
//!
//! ## Usage
//!
//! ```bash
//! tome --config ./config/tome.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tome index` | Build (or with `--rebuild`, regenerate) the vector index |
//! | `tome search "<query>"` | Print the top-k retrieved documents |
//! | `tome ask "<question>"` | Answer one question and exit |
//! | `tome chat` | Interactive question loop |
//! | `tome stats` | Summarize the persisted index |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tome::{answer, chat, config, index, search, stats};

/// Tome: retrieval-augmented question answering over book catalogs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tome.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tome",
    about = "Retrieval-augmented question answering over book catalogs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tome.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the persisted vector index from the catalog.
    ///
    /// Loads the catalog, synthesizes the document set, embeds it, and
    /// writes the SQLite bundle. A no-op when the bundle already exists
    /// unless `--rebuild` is given.
    Index {
        /// Delete the existing bundle and build from scratch.
        #[arg(long)]
        rebuild: bool,
    },

    /// Retrieve the documents most similar to a query.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results (defaults to retrieval.k).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a single question and exit.
    Ask {
        /// The question to answer.
        question: String,
    },

    /// Start the interactive question loop.
    Chat,

    /// Summarize the persisted index.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { rebuild } => {
            index::run_build(&cfg, rebuild).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Ask { question } => {
            answer::run_ask(&cfg, &question).await?;
        }
        Commands::Chat => {
            chat::run_chat(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
