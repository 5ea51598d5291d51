//! In-memory data files
//!
//! File contents outlive their handles, so a file closed by eviction and
//! opened again sees everything written before. Open/close counters make
//! handle lifetimes observable.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{BlobFile, Storage};

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicU64,
    closes: AtomicU64,
}

/// Snapshot of handle counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemStorageStats {
    /// Handles handed out by `open`
    pub opens: u64,
    /// Handles dropped
    pub closes: u64,
}

impl MemStorageStats {
    /// Handles currently alive
    pub fn live(&self) -> u64 {
        self.opens - self.closes
    }
}

/// Backing store kept entirely in memory
#[derive(Default)]
pub struct MemStorage {
    files: Mutex<HashMap<u64, Arc<RwLock<Vec<u8>>>>>,
    counters: Arc<Counters>,
    fail_opens: AtomicBool,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `open` fail (or succeed again)
    pub fn set_fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Current handle counters
    pub fn stats(&self) -> MemStorageStats {
        MemStorageStats {
            opens: self.counters.opens.load(Ordering::SeqCst),
            closes: self.counters.closes.load(Ordering::SeqCst),
        }
    }

    /// Number of files ever created
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

impl Storage for MemStorage {
    fn open(&self, num: u64) -> io::Result<Box<dyn BlobFile>> {
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("open of file {} refused", num),
            ));
        }
        let data = Arc::clone(self.files.lock().entry(num).or_default());
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemFile {
            data,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn list(&self) -> io::Result<Vec<(u64, u64)>> {
        let mut files: Vec<(u64, u64)> = self
            .files
            .lock()
            .iter()
            .map(|(num, data)| (*num, data.read().len() as u64))
            .collect();
        files.sort_unstable();
        Ok(files)
    }
}

struct MemFile {
    data: Arc<RwLock<Vec<u8>>>,
    counters: Arc<Counters>,
}

impl BlobFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let data = self.data.read();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).filter(|&end| end <= data.len());
        match end {
            Some(end) => {
                buf.copy_from_slice(&data[start..end]);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            )),
        }
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}
