//! The object engine: replace (put/tombstone) and get, including
//! streaming of on-disk values through the page cache. Grounded on
//! `examples/original_source/kernel/castle_objects.c`
//! (`castle_object_replace_cvt_get`, `OBJ_IO_MAX_BUFFER_SIZE`,
//! `castle_object_get_continue`).

use crate::cache::PageCache;
use crate::cvt::Cvt;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::freespace::{AllocPolicy, FreeSpaceFacade};
use crate::ids::{Cdb, VersionId};
use crate::key::{BKey, ObjectKey};
use crate::store::DaStore;
use log::debug;
use std::io::Read;
use std::sync::Arc;

pub enum ReplaceMode<'a> {
    /// `length` is the exact byte count the caller will read out of
    /// `source`; `std::io::Read` has no length-reporting method of its
    /// own, so it travels alongside the stream the same way a CVT
    /// carries its own `length` independent of the blocks backing it.
    Put { length: u64, source: &'a mut dyn Read },
    Tombstone,
}

/// Drives a put's windowed on-disk write as an explicit state machine,
/// mirroring the original's BIO-completion callbacks
/// (`castle_object_replace_cvt_get`'s "frame"/"buffer" vocabulary)
/// without an interrupt context: `AwaitFrame` blocks on the caller's
/// `Read` for the next window's bytes, `Copying` copies them into the
/// window's pinned blocks, `AwaitBuffer` releases those blocks and
/// decides whether another window remains, `Complete`/`Failed` are the
/// only terminal states and every pin taken this call is released
/// before either is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplaceState {
    AwaitFrame,
    Copying,
    AwaitBuffer,
    Complete,
    Failed,
}

pub enum GetResult {
    NotFound,
    Inline(Vec<u8>),
    OnDisk(ObjectGetStream),
}

fn blocks_for(len: u64, block_size: usize) -> u64 {
    (len + block_size as u64 - 1) / block_size as u64
}

pub struct ObjectEngine {
    config: EngineConfig,
    freespace: Arc<FreeSpaceFacade>,
    cache: Arc<PageCache>,
    store: Arc<DaStore>,
}

impl ObjectEngine {
    pub fn new(config: EngineConfig, freespace: Arc<FreeSpaceFacade>, cache: Arc<PageCache>, store: Arc<DaStore>) -> Self {
        ObjectEngine { config, freespace, cache, store }
    }

    /// Put or tombstone a key within `version`. Frees any previous
    /// on-disk blocks only after the new CVT has been computed, matching
    /// the original's "never leave the key pointing at freed blocks"
    /// ordering.
    pub fn replace(&self, version: VersionId, okey: &ObjectKey, mode: ReplaceMode<'_>) -> Result<()> {
        let key = BKey::encode(okey);
        let prev = self.store.get(version, &key)?;

        let new_cvt = match mode {
            ReplaceMode::Tombstone => Cvt::Tombstone,
            ReplaceMode::Put { length, source } => self.cvt_for_payload(version, length, source)?,
        };

        if let Cvt::OnDisk { length, cdb } = &prev {
            let blocks = blocks_for(*length, self.config.block_size);
            self.freespace.free(*cdb, version, blocks)?;
        }

        debug!("replace: version={version} key_dims={} -> {:?}", okey.nr_dims(), variant_name(&new_cvt));
        self.store.put(version, key, new_cvt);
        Ok(())
    }

    /// Reads `length` bytes out of `source` (the first frame, per the
    /// original's "read payload length from the stream" rule) and
    /// chooses inline vs. on-disk the way `castle_object_replace_cvt_get`
    /// does: small enough to fit the first frame goes inline, otherwise
    /// it streams through windowed on-disk writes.
    fn cvt_for_payload(&self, version: VersionId, length: u64, source: &mut dyn Read) -> Result<Cvt> {
        if length <= self.config.max_inline_value as u64 {
            let mut bytes = vec![0u8; length as usize];
            source.read_exact(&mut bytes).map_err(EngineError::Io)?;
            return Cvt::inline(bytes, self.config.max_inline_value);
        }

        let block_size = self.config.block_size;
        let total_blocks = blocks_for(length, block_size);
        if total_blocks as u32 > self.config.max_ondisk_blocks {
            return Err(EngineError::PayloadTooLarge {
                len: length,
                max: self.config.max_ondisk_blocks,
            });
        }

        let start_cdb = self.freespace.get_contiguous(version, AllocPolicy::Any, total_blocks)?;
        let window = self.config.obj_io_max_buffer_blocks as u64;

        let mut state = ReplaceState::AwaitFrame;
        let mut block_i = 0u64;
        let mut remaining = length;
        let mut frame = Vec::new();
        let mut read_error = None;

        loop {
            match state {
                ReplaceState::AwaitFrame => {
                    let blocks_this_window = std::cmp::min(window, total_blocks - block_i);
                    let window_bytes = std::cmp::min(blocks_this_window as usize * block_size, remaining as usize);
                    frame = vec![0u8; window_bytes];
                    state = match source.read_exact(&mut frame) {
                        Ok(()) => ReplaceState::Copying,
                        Err(e) => {
                            read_error = Some(e);
                            ReplaceState::Failed
                        }
                    };
                }
                ReplaceState::Copying => {
                    let blocks_this_window = std::cmp::min(window, total_blocks - block_i);
                    for b in 0..blocks_this_window {
                        let cdb = start_cdb.advance(block_i + b);
                        let mut buf = self.cache.pin_fresh(cdb)?;
                        let start = (b as usize) * block_size;
                        if start < frame.len() {
                            let end = std::cmp::min(start + block_size, frame.len());
                            buf.bytes_mut()[..end - start].copy_from_slice(&frame[start..end]);
                        }
                        buf.release()?;
                    }
                    remaining -= frame.len() as u64;
                    block_i += blocks_this_window;
                    debug!("replace: wrote window of {blocks_this_window} block(s) starting at block {}", block_i - blocks_this_window);
                    state = ReplaceState::AwaitBuffer;
                }
                ReplaceState::AwaitBuffer => {
                    state = if block_i >= total_blocks { ReplaceState::Complete } else { ReplaceState::AwaitFrame };
                }
                ReplaceState::Complete => break,
                ReplaceState::Failed => {
                    return Err(EngineError::Io(read_error.expect("Failed is only entered with read_error set")));
                }
            }
        }

        Cvt::on_disk(length, start_cdb, block_size, self.config.max_ondisk_blocks)
    }

    pub fn get(&self, version: VersionId, okey: &ObjectKey) -> Result<GetResult> {
        let key = BKey::encode(okey);
        let cvt = self.store.get(version, &key)?;
        match cvt {
            Cvt::Invalid | Cvt::Tombstone => Ok(GetResult::NotFound),
            Cvt::Inline(bytes) => Ok(GetResult::Inline(bytes)),
            Cvt::OnDisk { length, cdb } => Ok(GetResult::OnDisk(ObjectGetStream {
                cache: self.cache.clone(),
                cdb,
                block_size: self.config.block_size,
                obj_io_max_buffer_blocks: self.config.obj_io_max_buffer_blocks as u64,
                remaining: length,
                buffer: Vec::new(),
                buffer_pos: 0,
            })),
        }
    }

    /// Convenience for callers with the whole payload in memory already.
    pub fn get_all(&self, version: VersionId, okey: &ObjectKey) -> Result<Option<Vec<u8>>> {
        match self.get(version, okey)? {
            GetResult::NotFound => Ok(None),
            GetResult::Inline(bytes) => Ok(Some(bytes)),
            GetResult::OnDisk(mut stream) => {
                let mut out = Vec::new();
                stream.read_to_end(&mut out).map_err(EngineError::Io)?;
                Ok(Some(out))
            }
        }
    }
}

fn variant_name(cvt: &Cvt) -> &'static str {
    match cvt {
        Cvt::Invalid => "invalid",
        Cvt::Tombstone => "tombstone",
        Cvt::Inline(_) => "inline",
        Cvt::OnDisk { .. } => "ondisk",
    }
}

/// Streams an on-disk value one buffer window (of up to
/// `obj_io_max_buffer_blocks` blocks) at a time, pinning and releasing
/// each block as it's consumed (invariant G1).
pub struct ObjectGetStream {
    cache: Arc<PageCache>,
    cdb: Cdb,
    block_size: usize,
    obj_io_max_buffer_blocks: u64,
    remaining: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl ObjectGetStream {
    fn fill_window(&mut self) -> Result<()> {
        let blocks_remaining = blocks_for(self.remaining, self.block_size);
        let window_blocks = std::cmp::min(self.obj_io_max_buffer_blocks, blocks_remaining);
        let mut data = Vec::with_capacity((window_blocks as usize) * self.block_size);
        for i in 0..window_blocks {
            let buf = self.cache.pin(self.cdb.advance(i))?;
            data.extend_from_slice(buf.bytes());
            buf.release()?;
        }
        let take = std::cmp::min(data.len() as u64, self.remaining) as usize;
        data.truncate(take);
        self.remaining -= take as u64;
        self.cdb = self.cdb.advance(window_blocks);
        self.buffer = data;
        self.buffer_pos = 0;
        Ok(())
    }
}

impl Read for ObjectGetStream {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if self.buffer_pos >= self.buffer.len() {
            if self.remaining == 0 {
                return Ok(0);
            }
            self.fill_window()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        }
        let n = std::cmp::min(out.len(), self.buffer.len() - self.buffer_pos);
        out[..n].copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + n]);
        self.buffer_pos += n;
        Ok(n)
    }
}
