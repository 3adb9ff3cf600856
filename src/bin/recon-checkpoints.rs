//! Inspect and prune saved pipeline checkpoints.

use anyhow::{Context as AnyhowContext, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recon_pipeline::{CheckpointStore, EngineConfig, FileCheckpointStore};

#[derive(Parser)]
#[command(name = "recon-checkpoints", version, about = "Manage reconciliation pipeline checkpoints")]
struct Cli {
    /// Base directory holding the `checkpoints` folder (default: RECON_CHECKPOINT_ROOT or .)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List checkpoints, newest first
    List {
        /// Only show checkpoints of this task
        #[arg(long)]
        task: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the metadata record of a checkpoint
    Show { name: String },
    /// Delete a checkpoint
    Delete { name: String },
    /// Delete all but the most recent checkpoints
    Cleanup {
        /// How many to keep (default: RECON_KEEP_CHECKPOINTS or 5)
        #[arg(long)]
        keep: Option<usize>,
        #[arg(long)]
        task: Option<String>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,recon_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env().context("Failed to load configuration")?;
    if let Some(root) = cli.root {
        config = config.with_checkpoint_root(root);
    }

    let mut store = FileCheckpointStore::from_config(&config)
        .with_context(|| format!("Failed to open checkpoint store at {}", config.checkpoint_root.display()))?;

    match cli.command {
        Command::List { task, json } => {
            let checkpoints = store.list_checkpoints(task.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&checkpoints)?);
            } else if checkpoints.is_empty() {
                println!("No checkpoints in {}", store.root().display());
            } else {
                println!("{:<48} {:<24} {:<16} {:>12}", "NAME", "STEP", "SAVED", "SHAPE");
                for info in &checkpoints {
                    println!(
                        "{:<48} {:<24} {:<16} {:>12}",
                        info.name,
                        info.step,
                        info.timestamp,
                        format!("{}x{}", info.data_shape[0], info.data_shape[1])
                    );
                }
            }
        }
        Command::Show { name } => {
            let sidecar = store
                .read_sidecar(&name)
                .with_context(|| format!("Failed to read checkpoint '{}'", name))?;
            println!("{}", serde_json::to_string_pretty(&sidecar)?);
        }
        Command::Delete { name } => {
            if store.delete_checkpoint(&name)? {
                println!("Deleted {}", name);
            } else {
                println!("No checkpoint named {}", name);
            }
        }
        Command::Cleanup { keep, task } => {
            let keep = keep.unwrap_or(config.keep_checkpoints);
            let deleted = store.cleanup_old_checkpoints(keep, task.as_deref())?;
            println!("Deleted {} checkpoint(s), kept up to {}", deleted, keep);
        }
    }

    Ok(())
}
