//! Slot placement
//!
//! Finds a data file with room for a new slot, preferring files already
//! known to have free space and opening new files by number only when
//! those run out.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BlobError, Result};
use crate::storage::{Allocator, FileRef, Storage, StorageManager, HEADER_SIZE};

/// Offsets below this would overlap the allocator header
const MIN_SLOT_OFFSET: u64 = 512;

/// Approximate free bytes per data file
///
/// Advisory: every entry is re-checked against the live allocator before a
/// placement relies on it.
#[derive(Debug, Default)]
pub(crate) struct FreeSpaceMap {
    sizes: HashMap<u64, u64>,
    /// Lowest file number the map has not visited yet
    last_free: u64,
}

impl FreeSpaceMap {
    /// Known files recorded with at least `need` free bytes, lowest first
    fn candidates(&self, need: u64) -> Vec<u64> {
        let mut nums: Vec<u64> = self
            .sizes
            .iter()
            .filter(|&(_, &free)| free >= need)
            .map(|(&num, _)| num)
            .collect();
        nums.sort_unstable();
        nums
    }

    fn record(&mut self, num: u64, free: u64) {
        self.sizes.insert(num, free);
    }

    /// Advance the watermark, returning the number it passed
    fn claim_next(&mut self) -> u64 {
        let num = self.last_free;
        self.last_free += 1;
        num
    }
}

/// Free-space map plus the search that uses it
///
/// ## Concurrency:
/// - `map`: one Mutex, held only to read candidates or write single entries;
///   never across allocator or file I/O
pub(crate) struct Placement {
    map: Mutex<FreeSpaceMap>,
    probe_limit: usize,
}

impl Placement {
    pub(crate) fn new(probe_limit: usize) -> Self {
        Self {
            map: Mutex::new(FreeSpaceMap::default()),
            probe_limit,
        }
    }

    /// Find and allocate a slot with at least `need` usable bytes
    ///
    /// 1. Try known files whose recorded free space is large enough
    /// 2. Walk the watermark forward, recording each new file's free space
    ///
    /// Gives up when no file could ever hold the request, or after
    /// `probe_limit` watermark steps.
    pub(crate) fn find_free(
        &self,
        files: &StorageManager,
        need: usize,
    ) -> Result<(u64, u64, FileRef)> {
        let chunk = Allocator::chunk_size_for(need as u64)
            .ok_or(BlobError::InsertionFailed { size: need })?;
        if chunk > files.max_file_size().saturating_sub(HEADER_SIZE) {
            return Err(BlobError::InsertionFailed { size: need });
        }

        let candidates = self.map.lock().candidates(need as u64);
        for num in candidates {
            let file = match files.open(num) {
                Ok(file) => file,
                Err(e) => {
                    debug!(file = num, error = %e, "skipping unopenable data file");
                    continue;
                }
            };
            if let Some(offset) = self.try_alloc(&file, need) {
                return Ok((num, offset, file));
            }
        }

        for _ in 0..self.probe_limit {
            let num = self.map.lock().claim_next();
            let file = match files.open(num) {
                Ok(file) => file,
                Err(e) => {
                    warn!(file = num, error = %e, "skipping unopenable data file");
                    continue;
                }
            };

            let free = file.approx_free_space();
            self.map.lock().record(num, free);
            if free < need as u64 {
                continue;
            }
            if let Some(offset) = self.try_alloc(&file, need) {
                debug!(file = num, "placement advanced to new data file");
                return Ok((num, offset, file));
            }
        }

        Err(BlobError::InsertionFailed { size: need })
    }

    /// Free the slot at `offset` and refresh the file's map entry
    pub(crate) fn release(&self, num: u64, offset: u64, file: &FileRef) -> Result<()> {
        file.free(offset)?;
        self.refresh(num, file);
        Ok(())
    }

    /// Record the file's current free space
    pub(crate) fn refresh(&self, num: u64, file: &FileRef) {
        let free = file.approx_free_space();
        self.map.lock().record(num, free);
    }

    /// Estimate remaining capacity against a budget of `max_file_space`
    ///
    /// Subtracts the used part of every known file, then the on-disk size
    /// of files at or past the watermark that the map has not seen.
    pub(crate) fn estimate_free_space(
        &self,
        storage: &dyn Storage,
        max_file_space: u64,
        max_file_size: u64,
    ) -> u64 {
        if max_file_space == 0 {
            return 0;
        }

        let listed = match storage.list() {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "cannot list data files for free-space estimate");
                return 0;
            }
        };

        let map = self.map.lock();
        let mut space = max_file_space as i128;
        for &free in map.sizes.values() {
            space -= max_file_size as i128 - free as i128;
        }
        for (num, size) in listed {
            if num >= map.last_free && !map.sizes.contains_key(&num) {
                space -= size as i128;
            }
        }

        space.clamp(0, u64::MAX as i128) as u64
    }

    /// Files present in the map, lowest first
    pub(crate) fn known_files(&self) -> Vec<u64> {
        let mut nums: Vec<u64> = self.map.lock().sizes.keys().copied().collect();
        nums.sort_unstable();
        nums
    }

    pub(crate) fn known_free_space(&self, num: u64) -> Option<u64> {
        self.map.lock().sizes.get(&num).copied()
    }

    pub(crate) fn watermark(&self) -> u64 {
        self.map.lock().last_free
    }

    /// Accept the file only if a real allocation of `need` bytes succeeds
    fn try_alloc(&self, file: &FileRef, need: usize) -> Option<u64> {
        if file.approx_free_space_for(need) < need as u64 {
            return None;
        }
        match file.alloc(need) {
            Ok(offset) if offset >= MIN_SLOT_OFFSET => {
                self.refresh(file.number(), file);
                Some(offset)
            }
            Ok(offset) => {
                warn!(file = file.number(), offset, "allocator returned an offset inside the header");
                None
            }
            Err(e) => {
                debug!(file = file.number(), error = %e, "allocation rejected");
                None
            }
        }
    }
}
