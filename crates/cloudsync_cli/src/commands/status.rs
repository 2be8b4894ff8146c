//! Status command implementation.

use cloudsync_engine::{FsCluster, StatusReport, SyncConfig};
use cloudsync_storage::FileLedgerStore;
use std::path::Path;

/// Prints the progress of the run whose ledger lives in `cluster_path`.
pub fn run(cluster_path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cluster = FsCluster::new(cluster_path);
    let store = FileLedgerStore::new(cluster_path);
    let report = cloudsync_engine::status(&SyncConfig::new(), &cluster, &store)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "text" => print_text(&report),
        other => return Err(format!("Unknown format: {other} (expected text or json)").into()),
    }
    Ok(())
}

fn print_text(report: &StatusReport) {
    println!("Migration Status");
    println!("================");
    println!("  Total indices: {}", report.total_indices);
    println!("  Completed: {}", report.completed_indices);
    println!("  Pending snapshot: {}", report.pending_indices_to_snapshot);
    println!("  Pending restore: {}", report.pending_indices_to_restore);
    if report.in_progress_indices > 0 {
        println!("  In progress: {}", report.in_progress_indices);
    }
    println!("  Resident artifacts: {}", report.resident_artifacts);
    println!(
        "  Total size: {} ({} bytes)",
        report.total_size, report.total_size_in_bytes
    );
    println!(
        "  Pending size: {} ({} bytes)",
        report.total_pending_size, report.total_pending_size_in_bytes
    );
}
