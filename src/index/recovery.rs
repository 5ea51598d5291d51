//! Log Recovery
//!
//! Handles crash recovery by replaying the index log.

use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::Path;

use tracing::warn;

use crate::error::Result;

use super::entry::ReadOutcome;
use super::LogEntry;

/// Handles index log recovery after a crash
pub struct LogRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries found (replay stops at the first)
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the log was (or would be) truncated to its valid prefix
    pub was_truncated: bool,
}

impl LogRecovery {
    /// Recover entries from a log file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Stop at the first torn or corrupted entry
    /// 3. Truncate the file to its valid prefix
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path) -> Result<(Vec<LogEntry>, RecoveryResult)> {
        let (entries, result, valid_len) = Self::scan(path)?;

        if result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        Ok((entries, result))
    }

    /// Verify integrity of a log file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, result, _) = Self::scan(path)?;
        Ok(result)
    }

    fn scan(path: &Path) -> Result<(Vec<LogEntry>, RecoveryResult, u64)> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();
        let mut valid_len = 0u64;

        loop {
            match LogEntry::read_from(&mut reader)? {
                ReadOutcome::Entry(entry, framed) => {
                    if entry.lsn <= result.last_lsn {
                        warn!(
                            lsn = entry.lsn,
                            last_lsn = result.last_lsn,
                            "index log LSN went backwards"
                        );
                        result.entries_corrupted += 1;
                        break;
                    }
                    result.last_lsn = entry.lsn;
                    result.entries_recovered += 1;
                    valid_len += framed;
                    entries.push(entry);
                }
                ReadOutcome::End => break,
                ReadOutcome::Torn => break,
                ReadOutcome::Corrupt(reason) => {
                    warn!(offset = valid_len, %reason, "corrupted index log entry");
                    result.entries_corrupted += 1;
                    break;
                }
            }
        }

        result.was_truncated = valid_len < file_len;
        Ok((entries, result, valid_len))
    }
}
