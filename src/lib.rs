//! A versioned, block-addressed key/value storage engine: a version
//! tree with copy-on-write snapshots and clones, a multi-dimensional
//! object-key codec, an object engine for put/get/range-query, a
//! block-relocation transfer engine, and the free-space and page-cache
//! façades underneath them.

pub mod cache;
pub mod config;
pub mod cvt;
pub mod device;
pub mod dump;
pub mod engine;
pub mod error;
pub mod freespace;
pub mod ids;
pub mod key;
pub mod metadata;
pub mod objects;
pub mod range;
pub mod store;
pub mod structures;
pub mod transfer;
pub mod versions;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
