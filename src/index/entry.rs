//! Log Entry definitions
//!
//! Defines the structure and framing of individual index log entries.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{BlobError, Result};

/// Frame header size: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Largest data section accepted when reading the log back
pub const MAX_ENTRY_SIZE: u32 = 64 * 1024 * 1024;

/// A single entry in the index log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation to perform
    pub operation: Operation,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

/// Outcome of reading one frame from a log stream
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// A complete, verified entry and its framed length
    Entry(LogEntry, u64),
    /// Clean end of the stream
    End,
    /// The stream ends inside a frame
    Torn,
    /// A complete frame failed verification
    Corrupt(String),
}

impl LogEntry {
    pub fn new(lsn: u64, operation: Operation) -> Self {
        Self { lsn, operation }
    }

    /// Frame the entry: header followed by the bincode data
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let data = bincode::serialize(&self.operation)
            .map_err(|e| BlobError::Serialization(e.to_string()))?;
        if data.len() > MAX_ENTRY_SIZE as usize {
            return Err(BlobError::Serialization(format!(
                "Index entry too large: {} bytes (max {})",
                data.len(),
                MAX_ENTRY_SIZE
            )));
        }

        let len = data.len() as u32;
        let crc = Self::compute_crc(self.lsn, len, &data);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + data.len());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&data);
        Ok(bytes)
    }

    /// CRC32 over LSN, length and data
    pub fn compute_crc(lsn: u64, len: u32, data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(&len.to_le_bytes());
        hasher.update(data);
        hasher.finalize()
    }

    /// Read the next frame from `reader`
    pub(crate) fn read_from(reader: &mut impl Read) -> Result<ReadOutcome> {
        let mut header = [0u8; HEADER_SIZE];
        match read_full(reader, &mut header)? {
            0 => return Ok(ReadOutcome::End),
            n if n < HEADER_SIZE => return Ok(ReadOutcome::Torn),
            _ => {}
        }

        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&header[0..8]);
        crc.copy_from_slice(&header[8..12]);
        len.copy_from_slice(&header[12..16]);
        let lsn = u64::from_le_bytes(lsn);
        let crc = u32::from_le_bytes(crc);
        let len = u32::from_le_bytes(len);

        if len > MAX_ENTRY_SIZE {
            return Ok(ReadOutcome::Corrupt(format!(
                "entry length {} exceeds maximum {}",
                len, MAX_ENTRY_SIZE
            )));
        }

        let mut data = vec![0u8; len as usize];
        if read_full(reader, &mut data)? < data.len() {
            return Ok(ReadOutcome::Torn);
        }

        if Self::compute_crc(lsn, len, &data) != crc {
            return Ok(ReadOutcome::Corrupt(format!("CRC mismatch at LSN {}", lsn)));
        }

        match bincode::deserialize::<Operation>(&data) {
            Ok(operation) => Ok(ReadOutcome::Entry(
                LogEntry { lsn, operation },
                (HEADER_SIZE + data.len()) as u64,
            )),
            Err(e) => Ok(ReadOutcome::Corrupt(format!(
                "undecodable operation at LSN {}: {}",
                lsn, e
            ))),
        }
    }
}

/// Read until `buf` is full or the stream ends; returns bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
