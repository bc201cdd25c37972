//! Binary restart journal: one MessagePack blob per mirrored table holding
//! the row batch captured during the first preload. Purely a restart-time
//! accelerator; losing it only costs the next start a full scan.

use crate::core::{MirrorError, Result, RowBatch};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

const MARKER_FILE: &str = ".rowmirror-journal";

/// Journal directory handle. Opening it proves write access once, at
/// configuration time, by writing a marker file.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            MirrorError::Journal(format!("cannot create journal directory {:?}: {}", dir, e))
        })?;
        fs::write(dir.join(MARKER_FILE), b"rowmirror journal directory\n").map_err(|e| {
            MirrorError::Journal(format!("journal directory {:?} is not writable: {}", dir, e))
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.journal", table))
    }

    pub fn exists(&self, table: &str) -> bool {
        self.path_for(table).exists()
    }

    /// Encode and persist the batch atomically (temp file + rename + fsync).
    /// An empty batch is a no-op: no file is written.
    pub fn write(&self, table: &str, batch: &RowBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let encoded = rmp_serde::to_vec(batch)
            .map_err(|e| MirrorError::Journal(format!("failed to encode journal: {}", e)))?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| MirrorError::Journal(format!("failed to create temp file: {}", e)))?;
        tmp.write_all(&encoded)
            .map_err(|e| MirrorError::Journal(format!("failed to write journal: {}", e)))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| MirrorError::Journal(format!("failed to sync journal: {}", e)))?;
        tmp.persist(self.path_for(table))
            .map_err(|e| MirrorError::Journal(format!("failed to persist journal: {}", e)))?;

        info!(table, rows = batch.len(), "wrote restart journal");
        Ok(())
    }

    /// Decode the journal for a table, `None` if no file exists.
    pub fn read(&self, table: &str) -> Result<Option<RowBatch>> {
        let path = self.path_for(table);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)
            .map_err(|e| MirrorError::Journal(format!("failed to read journal: {}", e)))?;
        let batch = rmp_serde::from_slice(&data)
            .map_err(|e| MirrorError::Journal(format!("failed to decode journal: {}", e)))?;
        Ok(Some(batch))
    }

    /// Remove a stale journal, idempotent if no file exists.
    pub fn delete(&self, table: &str) -> Result<()> {
        let path = self.path_for(table);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| MirrorError::Journal(format!("failed to delete journal: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Row;
    use tempfile::TempDir;

    fn batch_of(rows: &[Row]) -> RowBatch {
        let mut batch = RowBatch::new();
        for row in rows {
            batch.push(row);
        }
        batch
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        let rows = vec![
            Row::new().with("id", 1i64).with("handle", "alice"),
            Row::new().with("id", 2i64).with("handle", "bob"),
        ];
        let batch = batch_of(&rows);
        journal.write("users", &batch).unwrap();

        let decoded = journal.read("users").unwrap().unwrap();
        assert_eq!(decoded, batch);
        assert_eq!(decoded.into_rows(), rows);
    }

    #[test]
    fn test_empty_batch_writes_no_file() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        journal.write("users", &RowBatch::new()).unwrap();
        assert!(!journal.exists("users"));
        assert!(journal.read("users").unwrap().is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        journal.delete("users").unwrap();

        journal
            .write("users", &batch_of(&[Row::new().with("id", 1i64)]))
            .unwrap();
        assert!(journal.exists("users"));
        journal.delete("users").unwrap();
        assert!(!journal.exists("users"));
        journal.delete("users").unwrap();
    }

    #[test]
    fn test_corrupt_file_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        fs::write(dir.path().join("users.journal"), b"not msgpack").unwrap();
        assert!(matches!(
            journal.read("users").unwrap_err(),
            MirrorError::Journal(_)
        ));
    }

    #[test]
    fn test_marker_file_written_on_open() {
        let dir = TempDir::new().unwrap();
        let _journal = Journal::open(dir.path()).unwrap();
        assert!(dir.path().join(MARKER_FILE).exists());
    }
}
