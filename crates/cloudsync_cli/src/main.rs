//! cloudsync CLI
//!
//! Drives a migration between two filesystem clusters.
//!
//! # Commands
//!
//! - `start` - Start the source or sink loop and run it until done or interrupted
//! - `status` - Show migration progress (source cluster only)
//! - `reset` - Delete the ledger so the next source start begins a fresh run

mod commands;

use clap::{Parser, Subcommand};
use cloudsync_engine::{RetryConfig, RunParams, SyncConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Migrates collections between clusters through a shared snapshot repository.
#[derive(Parser)]
#[command(name = "cloudsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the cluster directory
    #[arg(global = true, short, long)]
    cluster: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a source or sink loop
    Start {
        /// Loop to run (source or sink)
        #[arg(short, long)]
        mode: Option<String>,

        /// Repository store type (fs, gcs, s3)
        #[arg(short, long)]
        store: Option<String>,

        /// Collection pattern, comma separated globs (source only)
        #[arg(short, long)]
        indices: Option<String>,

        /// Repository directory or bucket
        #[arg(short, long)]
        location: Option<String>,

        /// JSON start body, used instead of the flags above
        #[arg(long, conflicts_with_all = ["mode", "store", "indices", "location"])]
        body: Option<String>,

        /// Seconds between cycles
        #[arg(long, default_value = "10")]
        interval_secs: u64,

        /// Artifacts allowed in the repository before the source pauses
        #[arg(long, default_value = "1")]
        backlog_bound: usize,

        /// Consecutive failed backlog checks before the source gives up
        #[arg(long, default_value = "5")]
        backlog_retries: u32,

        /// Give up waiting for a restored collection after this many seconds
        #[arg(long)]
        health_timeout_secs: Option<u64>,

        /// Repair SNAPSHOT_IN_PROGRESS entries left by a crashed source
        #[arg(long)]
        requeue_in_progress: bool,
    },

    /// Show migration progress
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete the ledger so the next source start begins a fresh run
    Reset,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Start {
            mode,
            store,
            indices,
            location,
            body,
            interval_secs,
            backlog_bound,
            backlog_retries,
            health_timeout_secs,
            requeue_in_progress,
        } => {
            let cluster = cli.cluster.ok_or("Cluster directory required for start")?;
            let params = match body {
                Some(body) => RunParams::from_json(&body)?,
                None => RunParams::from_parts(
                    mode.as_deref(),
                    store.as_deref(),
                    indices.as_deref(),
                    location.as_deref(),
                )?,
            };

            let mut config = SyncConfig::new()
                .with_cycle_interval(Duration::from_secs(interval_secs))
                .with_backlog_bound(backlog_bound)
                .with_retry(RetryConfig::new(backlog_retries))
                .with_requeue_in_progress(requeue_in_progress);
            if let Some(secs) = health_timeout_secs {
                config = config.with_health_timeout(Duration::from_secs(secs));
            }

            commands::start::run(&cluster, params, config).await?;
        }
        Commands::Status { format } => {
            let cluster = cli.cluster.ok_or("Cluster directory required for status")?;
            commands::status::run(&cluster, &format)?;
        }
        Commands::Reset => {
            let cluster = cli.cluster.ok_or("Cluster directory required for reset")?;
            commands::reset::run(&cluster)?;
        }
        Commands::Version => {
            println!("cloudsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
