//! Append-only file-backed history store.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [FRAME 1: codec-encoded StatusUpdate]
//! [FRAME 2: codec-encoded StatusUpdate]
//! ...
//! ```
//!
//! Opening an existing log replays it to rebuild the id index. A corrupt or
//! truncated tail is cut off at the last good frame so later appends stay
//! readable.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::StatusUpdate;

use super::codec;
use super::history::HistoryStore;

fn io_err(e: &IoError) -> StoreError {
    match e.kind() {
        ErrorKind::InvalidData => StoreError::Serialization(e.to_string()),
        _ => StoreError::Backend(e.to_string()),
    }
}

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Backend(format!("poisoned lock: {context}"))
}

struct LogScan {
    entries: Vec<StatusUpdate>,
    valid_len: u64,
    corruption: Option<IoError>,
}

fn scan(path: &Path) -> IoResult<LogScan> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;

    let mut entries = Vec::new();
    let mut valid_len = codec::HEADER_LEN;
    let mut corruption = None;
    while valid_len < file_size {
        match codec::decode::<StatusUpdate>(&mut reader) {
            Ok(update) => {
                entries.push(update);
                valid_len = reader.stream_position()?;
            }
            Err(e) => {
                corruption = Some(e);
                break;
            }
        }
    }
    Ok(LogScan {
        entries,
        valid_len,
        corruption,
    })
}

/// [`HistoryStore`] backed by an append-only log file.
pub struct FileHistoryStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    ids: Mutex<HashSet<Uuid>>,
    sync_on_write: bool,
}

impl FileHistoryStore {
    /// Opens or creates the log at `path`.
    ///
    /// With `sync_on_write`, every record is fsynced before `record` returns.
    ///
    /// # Errors
    /// `Backend` on I/O failure, `Serialization` if the file is not a history
    /// log.
    pub fn open(path: &Path, sync_on_write: bool) -> Result<Self, StoreError> {
        let existing = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        let mut ids = HashSet::new();
        if existing == 0 {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(|e| io_err(&e))?;
            codec::write_header(&mut file).map_err(|e| io_err(&e))?;
            file.sync_all().map_err(|e| io_err(&e))?;
        } else {
            let log = scan(path).map_err(|e| io_err(&e))?;
            if let Some(e) = &log.corruption {
                warn!(
                    path = %path.display(),
                    valid_entries = log.entries.len(),
                    error = %e,
                    "history log corruption detected; truncating at last good frame"
                );
                let file = OpenOptions::new().write(true).open(path).map_err(|e| io_err(&e))?;
                file.set_len(log.valid_len).map_err(|e| io_err(&e))?;
                file.sync_all().map_err(|e| io_err(&e))?;
            }
            ids.extend(log.entries.iter().map(|u| u.id));
            debug!(path = %path.display(), entries = ids.len(), "opened history log");
        }

        let file = OpenOptions::new().append(true).open(path).map_err(|e| io_err(&e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            ids: Mutex::new(ids),
            sync_on_write,
        })
    }

    /// Reads every recorded update back in commit order.
    ///
    /// Stops at the first corrupt frame.
    ///
    /// # Errors
    /// `Backend` on I/O failure.
    pub fn replay(&self) -> Result<Vec<StatusUpdate>, StoreError> {
        self.writer
            .lock()
            .map_err(|_| lock_err("history_writer"))?
            .flush()
            .map_err(|e| io_err(&e))?;

        let log = scan(&self.path).map_err(|e| io_err(&e))?;
        if let Some(e) = log.corruption {
            warn!(path = %self.path.display(), valid_entries = log.entries.len(), error = %e, "history log replay stopped early");
        }
        Ok(log.entries)
    }

    /// Number of recorded updates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.lock().map_or(0, |ids| ids.len())
    }

    /// True when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for FileHistoryStore {
    fn record(&self, update: &StatusUpdate) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().map_err(|_| lock_err("history_writer"))?;
        let mut ids = self.ids.lock().map_err(|_| lock_err("history_ids"))?;
        if ids.contains(&update.id) {
            return Err(StoreError::DuplicateEntry(update.id.to_string()));
        }

        let frame = codec::encode(update).map_err(|e| io_err(&e))?;
        writer.write_all(&frame).map_err(|e| io_err(&e))?;
        writer.flush().map_err(|e| io_err(&e))?;
        if self.sync_on_write {
            writer.get_ref().sync_all().map_err(|e| io_err(&e))?;
        }
        ids.insert(update.id);
        Ok(())
    }
}

impl std::fmt::Debug for FileHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHistoryStore")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeOperation, InventoryChange, StatusChange};
    use crate::status::PhysicalStatus;
    use tempfile::tempdir;

    fn update(record: &str) -> StatusUpdate {
        StatusUpdate::new(
            "inventory",
            record,
            ChangeOperation::Update,
            StatusChange::Inventory(InventoryChange {
                old_physical: Some(PhysicalStatus::Depot),
                new_physical: Some(PhysicalStatus::InTransit),
                old_business: None,
                new_business: None,
            }),
        )
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.log");
        let first = update("1");
        {
            let store = FileHistoryStore::open(&path, true).unwrap();
            store.record(&first).unwrap();
            store.record(&update("2")).unwrap();
            assert_eq!(store.len(), 2);
        }

        let store = FileHistoryStore::open(&path, false).unwrap();
        assert_eq!(store.len(), 2);
        assert!(matches!(store.record(&first), Err(StoreError::DuplicateEntry(_))));
        store.record(&update("3")).unwrap();

        let replayed = store.replay().unwrap();
        let ids: Vec<&str> = replayed.iter().map(|u| u.record_id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(replayed[0], first);
    }

    #[test]
    fn corrupt_tail_is_truncated_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.log");
        {
            let store = FileHistoryStore::open(&path, false).unwrap();
            store.record(&update("1")).unwrap();
            store.record(&update("2")).unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        {
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(len - 3).unwrap();
        }

        let store = FileHistoryStore::open(&path, false).unwrap();
        assert_eq!(store.len(), 1);
        store.record(&update("3")).unwrap();
        let ids: Vec<String> = store.replay().unwrap().into_iter().map(|u| u.record_id).collect();
        assert_eq!(ids, ["1", "3"]);
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not-a-log");
        std::fs::write(&path, b"hello world").unwrap();
        assert!(matches!(
            FileHistoryStore::open(&path, false),
            Err(StoreError::Serialization(_))
        ));
    }
}
