//! On-disk layouts: the per-slave superblock, the filesystem-wide
//! superblock (replicated on every slave), the version-tree node, and the
//! metadata-store entry. Grounded on `examples/wtfrank-dump_btrfs`'s
//! `structures.rs` (`#[repr(C, packed)]` + `static_assertions::assert_eq_size!`)
//! and on the magic/layout description in `examples/original_source/kernel/*`.

use crc::{Crc, CRC_32_ISCSI};

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub const SLAVE_SB_MAGIC1: u32 = 0x02061985;
pub const SLAVE_SB_MAGIC2: u32 = 0x16071983;
pub const SLAVE_SB_MAGIC3: u32 = 0x16061981;

pub const FS_SB_MAGIC1: u32 = 0x19731121;
pub const FS_SB_MAGIC2: u32 = 0x19880624;
pub const FS_SB_MAGIC3: u32 = 0x19821120;

pub const VTREE_NODE_SLOTS: usize = 63;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum SlaveFlags {
    NONE = 0,
    TARGET = 1,
    SPARE = 2,
}

/// First block of a slave device.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct SlaveSuperblock {
    pub magic1: u32,
    pub magic2: u32,
    pub magic3: u32,
    pub uuid: [u8; 16],
    pub used: u64,
    pub size: u64,
    pub flags: u8,
    pub checksum: u32,
    pub _reserved: [u8; 3],
}

static_assertions::assert_eq_size!([u8; 52], SlaveSuperblock);

impl SlaveSuperblock {
    pub fn is_valid(&self) -> bool {
        self.magic1 == SLAVE_SB_MAGIC1 && self.magic2 == SLAVE_SB_MAGIC2 && self.magic3 == SLAVE_SB_MAGIC3
    }

    fn checksum_input(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(41);
        buf.extend_from_slice(&self.magic1.to_le_bytes());
        buf.extend_from_slice(&self.magic2.to_le_bytes());
        buf.extend_from_slice(&self.magic3.to_le_bytes());
        buf.extend_from_slice(&self.uuid);
        buf.extend_from_slice(&self.used.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.push(self.flags);
        buf
    }

    /// CRC32 over every field but `checksum` itself. `stamp_checksum` fills
    /// it in before a superblock is written; `verify_checksum` checks it
    /// back on read.
    pub fn compute_checksum(&self) -> u32 {
        CRC32.checksum(&self.checksum_input())
    }

    pub fn stamp_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/// A pointer to a version-tree root: which slave, which block.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeRootPtr {
    pub disk1: u32,
    pub block1: u64,
    pub disk2: u32,
    pub block2: u64,
}

static_assertions::assert_eq_size!([u8; 24], TreeRootPtr);

/// Replicated byte-for-byte on every slave; a mismatch across slaves
/// fails mount.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct FsSuperblock {
    pub magic1: u32,
    pub magic2: u32,
    pub magic3: u32,
    pub salt: u32,
    pub pepper: u32,
    pub fwd_tree: TreeRootPtr,
    pub rev_tree: TreeRootPtr,
    pub checksum: u32,
}

static_assertions::assert_eq_size!([u8; 72], FsSuperblock);

impl FsSuperblock {
    pub fn is_valid(&self) -> bool {
        self.magic1 == FS_SB_MAGIC1 && self.magic2 == FS_SB_MAGIC2 && self.magic3 == FS_SB_MAGIC3
    }

    /// A slave-superblock style comparison that ignores nothing: every
    /// replicated field must agree.
    pub fn matches(&self, other: &FsSuperblock) -> bool {
        self.magic1 == other.magic1
            && self.magic2 == other.magic2
            && self.magic3 == other.magic3
            && self.salt == other.salt
            && self.pepper == other.pepper
            && self.fwd_tree == other.fwd_tree
            && self.rev_tree == other.rev_tree
            && self.checksum == other.checksum
    }

    fn checksum_input(&self) -> Vec<u8> {
        let fwd_tree = self.fwd_tree;
        let rev_tree = self.rev_tree;
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.magic1.to_le_bytes());
        buf.extend_from_slice(&self.magic2.to_le_bytes());
        buf.extend_from_slice(&self.magic3.to_le_bytes());
        buf.extend_from_slice(&self.salt.to_le_bytes());
        buf.extend_from_slice(&self.pepper.to_le_bytes());
        buf.extend_from_slice(&fwd_tree.disk1.to_le_bytes());
        buf.extend_from_slice(&fwd_tree.block1.to_le_bytes());
        buf.extend_from_slice(&fwd_tree.disk2.to_le_bytes());
        buf.extend_from_slice(&fwd_tree.block2.to_le_bytes());
        buf.extend_from_slice(&rev_tree.disk1.to_le_bytes());
        buf.extend_from_slice(&rev_tree.block1.to_le_bytes());
        buf.extend_from_slice(&rev_tree.disk2.to_le_bytes());
        buf.extend_from_slice(&rev_tree.block2.to_le_bytes());
        buf
    }

    /// CRC32 over every field but `checksum` itself, replicated and
    /// verified on every slave alongside `matches`.
    pub fn compute_checksum(&self) -> u32 {
        CRC32.checksum(&self.checksum_input())
    }

    pub fn stamp_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum VtreeSlotKind {
    EMPTY = 0,
    NODE = 1,
    NODE_LAST = 2,
    LEAF = 3,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct VtreeSlot {
    pub kind: u8,
    pub _reserved: [u8; 7],
    pub version_nr: u32,
    pub disk: u32,
    pub block: u64,
}

static_assertions::assert_eq_size!([u8; 24], VtreeSlot);

/// A node of the on-disk version tree, as described by `EXTERNAL
/// INTERFACES / on-disk formats`: a small header plus a slot array.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct VtreeNode {
    pub capacity: u32,
    pub used: u32,
    pub slots: [VtreeSlot; VTREE_NODE_SLOTS],
}

static_assertions::assert_eq_size!([u8; 8 + 24 * VTREE_NODE_SLOTS], VtreeNode);

/// One append-only entry in the metadata store, as written back by the
/// version registry (see `versions::VersionRegistry`).
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct VlistEntry {
    pub version_nr: u32,
    pub parent: u32,
    pub size: u64,
    pub da_id: u32,
}

static_assertions::assert_eq_size!([u8; 20], VlistEntry);
