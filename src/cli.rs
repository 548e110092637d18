use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;

use crate::core::Engine;

#[derive(Parser)]
#[command(name = "repo-intel")]
#[command(about = "Inventory source repositories and batch their call graphs for documentation")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List repository roots
    Discover {
        /// Directories to search (defaults to the configured roots)
        roots: Vec<PathBuf>,

        /// Print discovered roots as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse and group repositories, printing a JSON summary
    Scan {
        /// Directories to search (defaults to the configured roots)
        roots: Vec<PathBuf>,
    },

    /// Run the full pipeline and write reports
    Analyze {
        /// Directories to search (defaults to the configured roots)
        roots: Vec<PathBuf>,

        /// Report output directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Number of concurrent generator workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Scan and group without contacting the generator
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a default configuration file
    Init {
        /// Target file (defaults to ./repo-intel.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    pub async fn execute(self, mut engine: Engine) -> Result<()> {
        match self.command {
            Commands::Discover { roots, json } => {
                engine.set_roots(roots);
                engine.discover(json).await
            }
            Commands::Scan { roots } => {
                engine.set_roots(roots);
                engine.scan().await
            }
            Commands::Analyze { roots, out, workers, dry_run } => {
                engine.set_roots(roots);
                if let Some(out) = out {
                    engine.set_report_dir(out);
                }
                if let Some(workers) = workers {
                    engine.set_workers(workers);
                }
                engine.analyze(dry_run).await
            }
            Commands::Init { path, force } => engine.init(path, force).await,
        }
    }
}
