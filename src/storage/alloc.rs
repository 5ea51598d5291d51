//! Byte-Range Allocator
//!
//! Segregated free lists of power-of-two chunks, persisted inside the file
//! they manage. Freed chunks are reused by size class; a larger free chunk is
//! split when its own class is empty; otherwise the file grows at its
//! logical end. Neighbouring free chunks are not coalesced.

use tracing::warn;

use crate::error::{BlobError, Result};

use super::BlobFile;

// =============================================================================
// Layout Constants
// =============================================================================

/// Bytes reserved for the allocator header at the start of every file
pub const HEADER_SIZE: u64 = 512;

/// Bytes in front of every chunk's usable region
pub const CHUNK_HEADER_SIZE: u64 = 8;

/// Smallest chunk handed out (header included)
pub const MIN_CHUNK_SIZE: u64 = 1 << MIN_CLASS;

/// Largest chunk handed out (header included)
pub const MAX_CHUNK_SIZE: u64 = 1 << (MIN_CLASS + NUM_CLASSES as u32 - 1);

const MIN_CLASS: u32 = 9;
const NUM_CLASSES: usize = 17;

const MAGIC: &[u8; 8] = b"BLKVALC1";

const TAG_USED: u32 = 0x5553_4544;
const TAG_FREE: u32 = 0x4652_4545;

/// Magic (8) + End (8) + Heads (8 * 17) + Counts (8 * 17)
const HEADER_BODY: usize = 16 + 16 * NUM_CLASSES;

/// Body + CRC32 (4)
const HEADER_USED: usize = HEADER_BODY + 4;

fn chunk_size(class: usize) -> u64 {
    1 << (MIN_CLASS + class as u32)
}

/// Allocation state of one data file
///
/// The caller serializes access; every method takes the file it manages so
/// the allocator itself owns no handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocator {
    /// Logical end: header plus every chunk ever carved
    end: u64,
    /// First free chunk of each class (0 = empty list)
    heads: [u64; NUM_CLASSES],
    /// Length of each free list
    counts: [u64; NUM_CLASSES],
}

impl Allocator {
    /// Load the allocator of `file`, initializing an empty file
    pub fn open(file: &dyn BlobFile) -> Result<Self> {
        if file.len()? == 0 {
            let allocator = Self {
                end: HEADER_SIZE,
                heads: [0; NUM_CLASSES],
                counts: [0; NUM_CLASSES],
            };
            allocator.persist(file)?;
            return Ok(allocator);
        }

        let mut header = [0u8; HEADER_USED];
        file.read_at(&mut header, 0)
            .map_err(|e| BlobError::from_read(e, "allocator header"))?;

        if &header[0..8] != MAGIC {
            return Err(BlobError::Storage(format!(
                "Invalid allocator magic: {:?}",
                &header[0..8]
            )));
        }

        let stored_crc = u32::from_le_bytes(read_array(&header, HEADER_BODY));
        let actual_crc = crc32fast::hash(&header[..HEADER_BODY]);
        if stored_crc != actual_crc {
            return Err(BlobError::Storage(format!(
                "Allocator header CRC mismatch: stored {:08x}, computed {:08x}",
                stored_crc, actual_crc
            )));
        }

        let end = u64::from_le_bytes(read_array(&header, 8));
        if end < HEADER_SIZE {
            return Err(BlobError::Storage(format!(
                "Allocator end {} lies inside the header",
                end
            )));
        }

        let mut heads = [0u64; NUM_CLASSES];
        let mut counts = [0u64; NUM_CLASSES];
        for class in 0..NUM_CLASSES {
            heads[class] = u64::from_le_bytes(read_array(&header, 16 + 8 * class));
            counts[class] =
                u64::from_le_bytes(read_array(&header, 16 + 8 * (NUM_CLASSES + class)));
        }

        Ok(Self { end, heads, counts })
    }

    /// Chunk size (header included) that would serve a request of `size` bytes
    pub fn chunk_size_for(size: u64) -> Option<u64> {
        Self::class_for(size).map(chunk_size)
    }

    fn class_for(size: u64) -> Option<usize> {
        (0..NUM_CLASSES).find(|&class| chunk_size(class) - CHUNK_HEADER_SIZE >= size)
    }

    /// Allocate at least `size` usable bytes, returning the usable offset
    ///
    /// With `no_grow` set the request is served only from free chunks. On
    /// error the allocator is left as it was.
    pub fn alloc(&mut self, file: &dyn BlobFile, size: u64, no_grow: bool) -> Result<u64> {
        let class = Self::class_for(size).ok_or(BlobError::InsertionFailed {
            size: size as usize,
        })?;

        // Changes are staged on a copy and kept only once the header is saved
        let mut next = self.clone();
        let chunk = next
            .carve(file, class, no_grow)?
            .ok_or(BlobError::InsertionFailed {
                size: size as usize,
            })?;
        next.persist(file)?;

        if let Err(e) = file.write_at(&chunk_header(TAG_USED, class), chunk) {
            if let Err(restore) = self.persist(file) {
                warn!(chunk, error = %restore, "cannot restore allocator header");
            }
            return Err(e.into());
        }

        *self = next;
        Ok(chunk + CHUNK_HEADER_SIZE)
    }

    /// Return the chunk behind `offset` to its free list
    pub fn free(&mut self, file: &dyn BlobFile, offset: u64) -> Result<()> {
        let chunk = self.chunk_of(offset)?;
        let (tag, class) = read_chunk_header(file, chunk)?;
        if tag != TAG_USED {
            return Err(BlobError::Storage(format!(
                "Offset {} is not allocated (double free?)",
                offset
            )));
        }

        let mut next = self.clone();
        next.push_free(file, chunk, class)?;
        if let Err(e) = next.persist(file) {
            // The saved header still counts the chunk as allocated
            if let Err(restore) = file.write_at(&chunk_header(TAG_USED, class), chunk) {
                warn!(chunk, error = %restore, "cannot restore chunk header");
            }
            return Err(e);
        }

        *self = next;
        Ok(())
    }

    /// Usable bytes of the allocated chunk behind `offset`
    pub fn usable_size(&self, file: &dyn BlobFile, offset: u64) -> Result<u64> {
        let chunk = self.chunk_of(offset)?;
        let (tag, class) = read_chunk_header(file, chunk)?;
        if tag != TAG_USED {
            return Err(BlobError::Storage(format!(
                "Offset {} is not allocated",
                offset
            )));
        }
        Ok(chunk_size(class) - CHUNK_HEADER_SIZE)
    }

    /// Bytes sitting in free lists
    pub fn approx_free_space(&self) -> u64 {
        (0..NUM_CLASSES)
            .map(|class| self.counts[class] * chunk_size(class))
            .sum()
    }

    /// Free-list bytes in classes large enough to serve `size`
    pub fn approx_free_space_for(&self, size: u64) -> u64 {
        match Self::class_for(size) {
            Some(first) => (first..NUM_CLASSES)
                .map(|class| self.counts[class] * chunk_size(class))
                .sum(),
            None => 0,
        }
    }

    /// Logical file size
    pub fn file_size(&self) -> u64 {
        self.end
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn chunk_of(&self, offset: u64) -> Result<u64> {
        if offset < HEADER_SIZE + CHUNK_HEADER_SIZE || offset >= self.end {
            return Err(BlobError::Storage(format!(
                "Offset {} outside allocated range [{}, {})",
                offset,
                HEADER_SIZE + CHUNK_HEADER_SIZE,
                self.end
            )));
        }
        Ok(offset - CHUNK_HEADER_SIZE)
    }

    /// Pick a chunk of `class`: pop one, split a larger one, or grow
    ///
    /// `None` when only growth could serve the request and `no_grow` is set.
    fn carve(&mut self, file: &dyn BlobFile, class: usize, no_grow: bool) -> Result<Option<u64>> {
        if let Some(chunk) = self.pop_free(file, class)? {
            return Ok(Some(chunk));
        }

        if let Some(larger) = (class + 1..NUM_CLASSES).find(|&c| self.heads[c] != 0) {
            let chunk = self.pop_free(file, larger)?.ok_or_else(|| {
                BlobError::Storage(format!("free list {} emptied during split", larger))
            })?;
            // Keep the front, hand the halves behind it back as free chunks
            for c in class..larger {
                self.push_free(file, chunk + chunk_size(c), c)?;
            }
            return Ok(Some(chunk));
        }

        if no_grow {
            return Ok(None);
        }
        let chunk = self.end;
        self.end += chunk_size(class);
        Ok(Some(chunk))
    }

    fn pop_free(&mut self, file: &dyn BlobFile, class: usize) -> Result<Option<u64>> {
        let chunk = self.heads[class];
        if chunk == 0 {
            return Ok(None);
        }

        let (tag, found) = read_chunk_header(file, chunk)?;
        if tag != TAG_FREE || found != class {
            return Err(BlobError::Storage(format!(
                "Free list {} points at a non-free chunk at {}",
                class, chunk
            )));
        }

        let mut next = [0u8; 8];
        file.read_at(&mut next, chunk + CHUNK_HEADER_SIZE)
            .map_err(|e| BlobError::from_read(e, "free-list link"))?;

        self.heads[class] = u64::from_le_bytes(next);
        self.counts[class] = self.counts[class].saturating_sub(1);
        Ok(Some(chunk))
    }

    fn push_free(&mut self, file: &dyn BlobFile, chunk: u64, class: usize) -> Result<()> {
        let mut record = [0u8; 16];
        record[..8].copy_from_slice(&chunk_header(TAG_FREE, class));
        record[8..].copy_from_slice(&self.heads[class].to_le_bytes());
        file.write_at(&record, chunk)?;

        self.heads[class] = chunk;
        self.counts[class] += 1;
        Ok(())
    }

    fn persist(&self, file: &dyn BlobFile) -> Result<()> {
        let mut header = [0u8; HEADER_USED];
        header[0..8].copy_from_slice(MAGIC);
        header[8..16].copy_from_slice(&self.end.to_le_bytes());
        for class in 0..NUM_CLASSES {
            let head = 16 + 8 * class;
            let count = 16 + 8 * (NUM_CLASSES + class);
            header[head..head + 8].copy_from_slice(&self.heads[class].to_le_bytes());
            header[count..count + 8].copy_from_slice(&self.counts[class].to_le_bytes());
        }
        let crc = crc32fast::hash(&header[..HEADER_BODY]);
        header[HEADER_BODY..].copy_from_slice(&crc.to_le_bytes());

        file.write_at(&header, 0)?;
        Ok(())
    }
}

fn chunk_header(tag: u32, class: usize) -> [u8; 8] {
    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(&tag.to_le_bytes());
    header[4] = class as u8;
    header
}

fn read_chunk_header(file: &dyn BlobFile, chunk: u64) -> Result<(u32, usize)> {
    let mut header = [0u8; 8];
    file.read_at(&mut header, chunk)
        .map_err(|e| BlobError::from_read(e, "chunk header"))?;

    let tag = u32::from_le_bytes(read_array(&header, 0));
    let class = header[4] as usize;
    if class >= NUM_CLASSES || (tag != TAG_USED && tag != TAG_FREE) {
        return Err(BlobError::Storage(format!(
            "Corrupt chunk header at {}",
            chunk
        )));
    }
    Ok((tag, class))
}

fn read_array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}
