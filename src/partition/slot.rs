//! Slot framing
//!
//! A slot is a 4-byte big-endian length followed by that many payload
//! bytes. The usable size behind the slot may be larger.

use std::io::Write;

use bytes::{Buf, BufMut};
use crossbeam::queue::ArrayQueue;

use crate::error::{BlobError, Result};
use crate::storage::FileRef;

use super::MAX_VALUE_SIZE;

/// Length prefix in front of every payload
pub const SLOT_PREFIX_SIZE: usize = 4;

/// Write `value` with its length prefix at `offset`
pub(crate) fn write_slot(file: &FileRef, offset: u64, value: &[u8]) -> Result<()> {
    let mut prefix = [0u8; SLOT_PREFIX_SIZE];
    (&mut prefix[..]).put_u32(value.len() as u32);

    file.write_at(&prefix, offset)?;
    file.write_at(value, offset + SLOT_PREFIX_SIZE as u64)?;
    Ok(())
}

/// Copy the payload of the slot at `offset` into `sink`
pub(crate) fn read_slot<W: Write + ?Sized>(
    file: &FileRef,
    offset: u64,
    sink: &mut W,
    buffers: &BufferPool,
) -> Result<()> {
    let mut prefix = [0u8; SLOT_PREFIX_SIZE];
    file.read_at(&mut prefix, offset)
        .map_err(|e| BlobError::from_read(e, "slot length"))?;

    let len = (&prefix[..]).get_u32() as usize;
    if len > MAX_VALUE_SIZE {
        return Err(BlobError::Storage(format!(
            "Slot at {}:{} claims {} bytes (max {}), possible corruption",
            file.number(),
            offset,
            len,
            MAX_VALUE_SIZE
        )));
    }

    let mut buf = buffers.take(len);
    let read = file
        .read_at(&mut buf, offset + SLOT_PREFIX_SIZE as u64)
        .map_err(|e| BlobError::from_read(e, "slot payload"));
    let written = read.and_then(|()| sink.write_all(&buf).map_err(BlobError::from));
    buffers.give(buf);
    written
}

/// Reusable read buffers for redirect slots
pub(crate) struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
    /// Larger buffers are dropped rather than kept
    max_retained: usize,
}

impl BufferPool {
    pub(crate) fn new(capacity: usize, max_retained: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity),
            max_retained,
        }
    }

    /// A zeroed buffer of exactly `len` bytes
    pub(crate) fn take(&self, len: usize) -> Vec<u8> {
        let mut buf = self.buffers.pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    pub(crate) fn give(&self, buf: Vec<u8>) {
        if buf.capacity() <= self.max_retained {
            let _ = self.buffers.push(buf);
        }
    }
}
