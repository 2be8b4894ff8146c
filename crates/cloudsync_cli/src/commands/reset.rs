//! Reset command implementation.

use cloudsync_storage::{FileLedgerStore, LedgerStore};
use std::path::Path;

/// Deletes the ledger. Refuses while a source loop holds it.
pub fn run(cluster_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileLedgerStore::new(cluster_path);
    if !store.exists()? {
        println!("No ledger found at {:?}", store.dir());
        return Ok(());
    }

    let _lock = store.lock_exclusive()?;
    if store.delete()? {
        println!("✓ Ledger deleted");
        println!("  Path: {:?}", store.document_path());
        println!("  The next source start enumerates collections again");
    } else {
        println!("No ledger found at {:?}", store.dir());
    }
    Ok(())
}
