//! Identifiers and addresses shared across the engine.

use std::fmt;

/// A version number. 0 is the reserved root.
pub type VersionId = u32;

/// Identifies the data array (keyspace) a version belongs to.
pub type DaId = u32;

/// A block index within a slave device.
pub type BlockIndex = u64;

/// Stable identity of a slave block device, persisted in its superblock.
pub type SlaveUuid = uuid::Uuid;

/// Disk block address: a slave plus a block index on it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cdb {
    pub slave: SlaveUuid,
    pub block: BlockIndex,
}

impl Cdb {
    pub const INVALID_BLOCK: BlockIndex = BlockIndex::MAX;

    pub fn new(slave: SlaveUuid, block: BlockIndex) -> Self {
        Cdb { slave, block }
    }

    pub fn invalid() -> Self {
        Cdb {
            slave: uuid::Uuid::nil(),
            block: Self::INVALID_BLOCK,
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.block == Self::INVALID_BLOCK
    }

    /// The address `count` blocks after this one, same slave.
    pub fn advance(&self, count: u64) -> Cdb {
        Cdb {
            slave: self.slave,
            block: self.block + count,
        }
    }
}

impl fmt::Debug for Cdb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "Cdb(INVALID)")
        } else {
            write!(f, "Cdb({}, blk {})", self.slave, self.block)
        }
    }
}

impl Default for Cdb {
    fn default() -> Self {
        Self::invalid()
    }
}
