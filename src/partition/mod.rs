//! Partition Module
//!
//! Maps opaque keys to values on top of a metadata index.
//!
//! ## Responsibilities
//! - Decide inline vs. redirect placement of each value
//! - Update redirect values in place, relocate them, or free their slots
//! - Track approximate free space per data file to guide placement
//! - Estimate remaining capacity against a configured budget
//!
//! ## Value Placement
//! ```text
//!   put(id, value)
//!        │
//!        ├── len < min_size ──────────► index[id] = Inline(value)
//!        │
//!        └── len >= min_size
//!                 │
//!                 ▼
//!          ┌─────────────┐   find_free   ┌──────────────────────┐
//!          │  Placement  │──────────────►│ NNNNNN.dat           │
//!          │ (free map)  │               │  slot: len(4) | data │
//!          └─────────────┘               └──────────────────────┘
//!                 │
//!                 ▼
//!          index[id] = Redirect(file, offset)
//! ```

mod file;
mod placement;
mod record;
mod simple;
mod slot;

use std::io::Write;

use crate::config::{Backend, Config};
use crate::error::Result;

pub use file::FilePartition;
pub use record::ValueRecord;
pub use simple::SimplePartition;
pub use slot::SLOT_PREFIX_SIZE;

/// Largest value a partition accepts (in bytes)
pub const MAX_VALUE_SIZE: usize = 24 * 1024 * 1024 - 20;

/// Metadata index directory inside a partition directory
pub const INDEX_DIR: &str = "index";

/// Key-value surface shared by every partition backend
pub trait KeyValuePartition: Send + Sync {
    /// Store `value` under `id`; an empty value deletes the key
    fn put(&self, id: &[u8], value: &[u8]) -> Result<()>;

    /// Copy the value of `id` into `sink`
    fn get(&self, id: &[u8], sink: &mut dyn Write) -> Result<()>;

    /// Advisory estimate of remaining capacity (0 when unknown)
    fn approx_free_space(&self) -> u64;
}

/// Open the backend `config.backend` selects in `config.data_dir`
pub fn open_partition(config: &Config) -> Result<Box<dyn KeyValuePartition>> {
    Ok(match config.backend {
        Backend::File => Box::new(FilePartition::open(config)?),
        Backend::Index => Box::new(SimplePartition::open(config)?),
    })
}
