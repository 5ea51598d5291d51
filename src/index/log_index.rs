//! Durable metadata index
//!
//! Keeps the whole key space in a BTreeMap and makes every mutation durable
//! through the append-only log before it becomes visible.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::SyncStrategy;
use crate::error::Result;

use super::{LogRecovery, LogWriter, MetadataIndex, Operation, RecoveryResult};

/// Log-backed ordered index
///
/// ## Concurrency:
/// - Mutations take `writer` first, then `data`, so log order matches
///   map order
/// - Lookups only read `data`
pub struct LogIndex {
    dir: PathBuf,
    sync_strategy: SyncStrategy,
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    writer: Mutex<LogWriter>,
}

impl LogIndex {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LOG_FILENAME: &'static str = "index.log";
    const COMPACT_FILENAME: &'static str = "index.log.compact";

    /// Superseded entries tolerated on top of twice the live key count
    const COMPACT_SLACK: u64 = 1024;

    /// Open or create the index stored in `dir`
    ///
    /// On startup:
    /// 1. Recover the log, dropping a torn or corrupted tail
    /// 2. Replay it into memory
    /// 3. Compact if most of the log is superseded history
    pub fn open(dir: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::LOG_FILENAME);

        let (entries, recovery) = if path.exists() {
            LogRecovery::recover(&path)?
        } else {
            (Vec::new(), RecoveryResult::default())
        };

        if recovery.entries_recovered > 0 || recovery.entries_corrupted > 0 {
            info!(
                recovered = recovery.entries_recovered,
                corrupted = recovery.entries_corrupted,
                last_lsn = recovery.last_lsn,
                truncated = recovery.was_truncated,
                "index log recovered"
            );
        }

        let mut data = BTreeMap::new();
        for entry in entries {
            match entry.operation {
                Operation::Put { key, value } => {
                    data.insert(key, value);
                }
                Operation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }

        let live = data.len() as u64;
        let writer = LogWriter::open(&path, recovery.last_lsn, sync_strategy)?;
        let index = Self {
            dir: dir.to_path_buf(),
            sync_strategy,
            data: RwLock::new(data),
            writer: Mutex::new(writer),
        };

        if recovery.entries_recovered > 2 * live + Self::COMPACT_SLACK {
            index.compact()?;
        }

        Ok(index)
    }

    /// Rewrite the log so it holds one entry per live key
    pub fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        let data = self.data.read();

        let path = self.dir.join(Self::LOG_FILENAME);
        let tmp = self.dir.join(Self::COMPACT_FILENAME);
        match fs::remove_file(&tmp) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        {
            let mut out = LogWriter::open(
                &tmp,
                0,
                SyncStrategy::EveryNEntries { count: usize::MAX },
            )?;
            for (key, value) in data.iter() {
                out.append(Operation::Put {
                    key: key.clone(),
                    value: value.clone(),
                })?;
            }
            out.sync()?;
        }

        fs::rename(&tmp, &path)?;
        *writer = LogWriter::open(&path, data.len() as u64, self.sync_strategy)?;

        debug!(keys = data.len(), "compacted index log");
        Ok(())
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// LSN of the last logged mutation
    pub fn last_lsn(&self) -> u64 {
        self.writer.lock().current_lsn()
    }

    /// Force the log to disk
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().sync()
    }

    /// Path of the log file
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(Self::LOG_FILENAME)
    }
}

impl MetadataIndex for LogIndex {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.append(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        if !self.data.read().contains_key(key) {
            return Ok(());
        }
        writer.append(Operation::Delete { key: key.to_vec() })?;
        self.data.write().remove(key);
        Ok(())
    }
}
