//! Log Writer
//!
//! Handles appending entries to the index log file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::SyncStrategy;
use crate::error::{BlobError, Result};

use super::{LogEntry, Operation};

/// Append-only file a log is written to
pub trait LogFile: Write + Send {
    /// Cut the file back to `size` bytes
    fn set_len(&self, size: u64) -> io::Result<()>;

    /// Flush file contents to durable storage
    fn sync_data(&self) -> io::Result<()>;
}

impl LogFile for File {
    fn set_len(&self, size: u64) -> io::Result<()> {
        File::set_len(self, size)
    }

    fn sync_data(&self) -> io::Result<()> {
        File::sync_data(self)
    }
}

/// Appends entries to the index log
///
/// A failed append is cut back out of the file, so later entries never
/// land behind a partial frame. If that cut fails too, the writer refuses
/// every further append.
pub struct LogWriter<F: LogFile = File> {
    path: PathBuf,
    file: F,
    /// Length of the file's valid prefix
    len: u64,
    /// LSN given to the next appended entry
    next_lsn: u64,
    sync_strategy: SyncStrategy,
    /// Entries written since the last fsync
    unsynced: usize,
    poisoned: bool,
}

impl LogWriter<File> {
    /// Open or create a log file, continuing after `last_lsn`
    pub fn open(path: &Path, last_lsn: u64, sync_strategy: SyncStrategy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::with_file(path, file, len, last_lsn, sync_strategy))
    }
}

impl<F: LogFile> LogWriter<F> {
    /// Write to an already opened append-mode `file` whose first `len`
    /// bytes hold entries up to `last_lsn`
    pub fn with_file(
        path: &Path,
        file: F,
        len: u64,
        last_lsn: u64,
        sync_strategy: SyncStrategy,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            len,
            next_lsn: last_lsn + 1,
            sync_strategy,
            unsynced: 0,
            poisoned: false,
        }
    }

    /// Append an operation, returning its LSN
    ///
    /// The entry reaches the OS before this returns; fsync follows the
    /// configured strategy. On error nothing of the entry stays in the log.
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        if self.poisoned {
            return Err(BlobError::Storage(format!(
                "Index log {} holds a partial entry; reopen to recover",
                self.path.display()
            )));
        }

        let entry = LogEntry::new(self.next_lsn, operation);
        let bytes = entry.serialize()?;

        let due = match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => self.unsynced + 1 >= count,
        };
        let written = self
            .file
            .write_all(&bytes)
            .and_then(|_| self.file.flush())
            .and_then(|_| if due { self.file.sync_data() } else { Ok(()) });
        if let Err(e) = written {
            self.rollback();
            return Err(e.into());
        }

        self.len += bytes.len() as u64;
        self.next_lsn += 1;
        self.unsynced = if due { 0 } else { self.unsynced + 1 };
        Ok(entry.lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// LSN of the last appended entry (0 if none)
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn - 1
    }

    /// Bytes of complete entries in the log
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cut a failed append back out of the file
    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "cannot truncate partial index entry, refusing further appends"
            );
            self.poisoned = true;
        }
    }
}
