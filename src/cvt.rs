//! The cache value tuple: what a B-tree leaf entry actually stores.
//! Grounded on `examples/original_source/kernel/castle_objects.c`
//! (`castle_object_replace_cvt_get`, `CVT_INVALID`/`CVT_TOMBSTONE`/
//! `CVT_INLINE`/`CVT_ONDISK` macros).

use crate::error::{EngineError, Result};
use crate::ids::Cdb;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cvt {
    Invalid,
    Tombstone,
    Inline(Vec<u8>),
    OnDisk { length: u64, cdb: Cdb },
}

impl Cvt {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Cvt::Tombstone)
    }

    pub fn length(&self) -> u64 {
        match self {
            Cvt::Invalid | Cvt::Tombstone => 0,
            Cvt::Inline(bytes) => bytes.len() as u64,
            Cvt::OnDisk { length, .. } => *length,
        }
    }

    pub fn inline(bytes: Vec<u8>, max_inline: usize) -> Result<Cvt> {
        if bytes.len() > max_inline {
            return Err(EngineError::Invalid(format!(
                "inline value of {} bytes exceeds max_inline_value ({})",
                bytes.len(),
                max_inline
            )));
        }
        Ok(Cvt::Inline(bytes))
    }

    pub fn on_disk(length: u64, cdb: Cdb, block_size: usize, max_ondisk_blocks: u32) -> Result<Cvt> {
        let bs = block_size as u64;
        let blocks = (length + bs - 1) / bs;
        if blocks > max_ondisk_blocks as u64 {
            return Err(EngineError::PayloadTooLarge {
                len: length,
                max: max_ondisk_blocks,
            });
        }
        Ok(Cvt::OnDisk { length, cdb })
    }
}
