//! Start command implementation.

use cloudsync_engine::{FsCluster, LoopReport, RunMode, RunParams, SyncConfig};
use cloudsync_storage::FileLedgerStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Starts the loop for `params.mode` and blocks until it finishes or the
/// process receives Ctrl+C / SIGTERM.
///
/// The source holds the ledger lock for its whole run.
pub async fn run(
    cluster_path: &Path,
    params: RunParams,
    config: SyncConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let cluster = Arc::new(FsCluster::new(cluster_path));
    let store = Arc::new(FileLedgerStore::new(cluster_path));

    let _lock = match params.mode {
        RunMode::Source => Some(store.lock_exclusive()?),
        RunMode::Sink => None,
    };

    let handle = cloudsync_engine::start(&params, config, cluster, store)?;
    println!("✓ {} loop started", params.mode);
    println!("  Cluster: {:?}", cluster_path);
    println!("  Store: {}", params.store);
    if let Some(indices) = &params.indices {
        println!("  Indices: {}", indices);
    }
    if let Some(location) = &params.location {
        println!("  Location: {}", location);
    }

    let cancel = handle.cancel_token();
    let mut join = tokio::task::spawn_blocking(move || handle.join());

    let report = tokio::select! {
        result = &mut join => result??,
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping loop");
            cancel.cancel();
            join.await??
        }
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &LoopReport) {
    match report {
        LoopReport::Source(stats) => {
            if stats.completed {
                println!("✓ Source finished, every collection exported");
            } else {
                println!("✓ Source stopped");
            }
            println!("  Exported: {}", stats.exported);
            println!("  Backlog waits: {}", stats.backlog_waits);
            println!("  Retries: {}", stats.retries);
            if let Some(last) = &stats.last_exported {
                println!("  Last exported: {}", last);
            }
        }
        LoopReport::Sink(stats) => {
            println!("✓ Sink stopped");
            println!("  Cycles: {}", stats.cycles);
            println!("  Restored: {}", stats.restored);
            println!("  Skipped restores: {}", stats.skipped);
            println!("  Health timeouts: {}", stats.health_timeouts);
            println!("  Failed cycles: {}", stats.failed_cycles);
            if let Some(error) = &stats.last_error {
                println!("  Last error: {}", error);
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
