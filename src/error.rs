//! Error taxonomy for the whole engine.
//!
//! Registry invariants (V1-V6) that indicate a programmer error rather than
//! a recoverable condition are enforced with `debug_assert!`/`panic!` at
//! their call sites and never represented here.

use crate::ids::VersionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("version {0} not found")]
    VersionNotFound(VersionId),

    #[error("key not found")]
    KeyNotFound,

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("dimension count mismatch: expected {expected}, found {found}")]
    DimCountMismatch { expected: usize, found: usize },

    #[error("version {0} is already attached")]
    AlreadyAttached(VersionId),

    #[error("cannot snapshot version {0}: it already has a child")]
    SnapshotOfNonLeaf(VersionId),

    #[error("cannot clone version {0}: it is attached and has no children")]
    CloneOfAttachedLeaf(VersionId),

    #[error("version count quota ({0}) exceeded")]
    VersionQuotaExceeded(u32),

    #[error("cannot delete version {0}: it is attached")]
    DeleteWhileAttached(VersionId),

    #[error("out of memory")]
    NoMemory,

    #[error("no space left on device")]
    NoSpace,

    #[error("payload of {len} bytes exceeds the {max}-block on-disk cap")]
    PayloadTooLarge { len: u64, max: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
