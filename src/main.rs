//! # Threadwise CLI (`tw`)
//!
//! Runs the thread-aware chunker and summarizer over thread files and
//! prints the resulting units as JSON.
//!
//! ## Usage
//!
//! ```bash
//! tw --config ./config/tw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tw chunk <file>` | Print detail units (add `--summary` for summary units too) |
//! | `tw summarize <file>` | Print one extractive summary unit per thread |
//! | `tw config` | Print the effective configuration as TOML |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use threadwise::{commands, config, logging};

/// Threadwise CLI: thread-aware chunking and summarization for email.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults.
#[derive(Parser)]
#[command(
    name = "tw",
    about = "Threadwise: thread-aware chunking and summarization for email threads",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tw.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split threads into detail units.
    ///
    /// The file holds one thread object or an array of threads.
    Chunk {
        /// Path to the thread JSON file.
        file: PathBuf,

        /// Project id stamped on every unit.
        #[arg(long, default_value = "default")]
        project: String,

        /// Also emit each thread's summary unit, ahead of its details.
        #[arg(long)]
        summary: bool,
    },

    /// Summarize threads.
    ///
    /// No language model is bundled, so the extractive strategy is used.
    Summarize {
        /// Path to the thread JSON file.
        file: PathBuf,

        /// Project id stamped on every unit.
        #[arg(long, default_value = "default")]
        project: String,
    },

    /// Print the effective, validated configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Chunk {
            file,
            project,
            summary,
        } => {
            commands::run_chunk(&cfg, &file, &project, summary).await?;
        }
        Commands::Summarize { file, project } => {
            commands::run_summarize(&cfg, &file, &project).await?;
        }
        Commands::Config => {
            commands::run_config(&cfg)?;
        }
    }

    Ok(())
}
