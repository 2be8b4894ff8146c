//! File-based ledger store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/
//! └─ .cloudsync/
//!    ├─ 1.json        # Ledger document
//!    ├─ 1.json.tmp    # Temporary file for atomic writes
//!    └─ LOCK          # Advisory lock held by the running source loop
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store::LedgerStore;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Directory holding the ledger.
const LEDGER_DIR: &str = ".cloudsync";
/// Ledger document id.
const LEDGER_FILE: &str = "1.json";
const LEDGER_TEMP: &str = "1.json.tmp";
const LOCK_FILE: &str = "LOCK";

/// A file-based ledger store.
///
/// The document survives process restarts. Every write goes through a
/// write-then-rename so a crash never leaves a half-written ledger behind:
/// readers see either the previous document or the new one.
///
/// # Example
///
/// ```no_run
/// use cloudsync_storage::{FileLedgerStore, LedgerStore};
/// use std::path::Path;
///
/// let store = FileLedgerStore::new(Path::new("/var/lib/cluster"));
/// store.ensure_exists().unwrap();
/// store.write(r#"{"name":"cloudsync","snapshots":[]}"#).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    dir: PathBuf,
}

/// Exclusive hold on a ledger directory.
///
/// Only one source loop may mutate a ledger. The lock is released when this
/// value is dropped (or the process exits).
#[derive(Debug)]
pub struct LedgerLock {
    _file: File,
}

impl FileLedgerStore {
    /// Creates a store rooted at `root`. No I/O happens until first use.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(LEDGER_DIR),
        }
    }

    /// Returns the directory holding the ledger.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the ledger document.
    #[must_use]
    pub fn document_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    /// Acquires the single-writer lock, creating the ledger directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the lock.
    pub fn lock_exclusive(&self) -> StorageResult<LedgerLock> {
        fs::create_dir_all(&self.dir)?;
        let lock_path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(lock_path.display().to_string()));
        }

        Ok(LedgerLock { _file: file })
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced
        Ok(())
    }
}

impl LedgerStore for FileLedgerStore {
    fn read(&self) -> StorageResult<Option<String>> {
        let data = match fs::read(self.document_path()) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if data.is_empty() {
            return Ok(None);
        }

        String::from_utf8(data)
            .map(Some)
            .map_err(|e| StorageError::Corrupted(format!("ledger is not UTF-8: {e}")))
    }

    fn write(&self, document: &str) -> StorageResult<()> {
        if !self.dir.is_dir() {
            return Err(StorageError::NotInitialized(self.dir.display().to_string()));
        }

        let temp_path = self.dir.join(LEDGER_TEMP);
        let mut file = File::create(&temp_path)?;
        file.write_all(document.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.document_path())?;
        self.sync_directory()
    }

    fn ensure_exists(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn exists(&self) -> StorageResult<bool> {
        Ok(self.dir.is_dir())
    }

    fn delete(&self) -> StorageResult<bool> {
        match fs::remove_file(self.dir.join(LEDGER_TEMP)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(self.document_path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_absent_reads_none() {
        let dir = tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path());

        assert!(!store.exists().unwrap());
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn file_write_requires_location() {
        let dir = tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path());

        let result = store.write("{}");
        assert!(matches!(result, Err(StorageError::NotInitialized(_))));
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path());
        store.ensure_exists().unwrap();

        store.write("one").unwrap();
        store.write("two").unwrap();

        assert_eq!(store.read().unwrap().as_deref(), Some("two"));
        assert!(!store.dir().join(LEDGER_TEMP).exists());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let store = FileLedgerStore::new(dir.path());
            store.ensure_exists().unwrap();
            store.write("durable").unwrap();
        }

        let store = FileLedgerStore::new(dir.path());
        assert_eq!(store.read().unwrap().as_deref(), Some("durable"));
    }

    #[test]
    fn file_empty_document_reads_none() {
        let dir = tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path());
        store.ensure_exists().unwrap();
        fs::write(store.document_path(), b"").unwrap();

        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn file_invalid_utf8_is_corrupted() {
        let dir = tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path());
        store.ensure_exists().unwrap();
        fs::write(store.document_path(), [0xff, 0xfe, 0x00]).unwrap();

        assert!(matches!(store.read(), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_delete() {
        let dir = tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path());
        store.ensure_exists().unwrap();
        store.write("doc").unwrap();

        assert!(store.delete().unwrap());
        assert!(!store.delete().unwrap());
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn file_delete_removes_stale_temp() {
        let dir = tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path());
        store.ensure_exists().unwrap();
        store.write("doc").unwrap();
        fs::write(store.dir().join(LEDGER_TEMP), "half").unwrap();

        assert!(store.delete().unwrap());
        assert!(!store.dir().join(LEDGER_TEMP).exists());
    }

    #[test]
    fn file_delete_reports_temp_errors() {
        let dir = tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path());
        store.ensure_exists().unwrap();
        store.write("doc").unwrap();
        fs::create_dir(store.dir().join(LEDGER_TEMP)).unwrap();

        assert!(matches!(store.delete(), Err(StorageError::Io(_))));
        assert_eq!(store.read().unwrap().as_deref(), Some("doc"));
    }

    #[test]
    fn file_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path());

        let lock = store.lock_exclusive().unwrap();
        assert!(matches!(store.lock_exclusive(), Err(StorageError::Locked(_))));

        drop(lock);
        assert!(store.lock_exclusive().is_ok());
    }
}
