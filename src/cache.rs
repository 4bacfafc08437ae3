//! The page cache: a pinned-buffer abstraction over the registered block
//! devices. The object engine and transfer engine stream payloads through
//! `PinnedBuffer`s rather than touching devices directly, matching the
//! pin/dirty/unlock discipline described in
//! `examples/original_source/kernel/castle_objects.c`'s buffer windowing
//! (invariant G1: every pin is released on every exit path).

use crate::error::{EngineError, Result};
use crate::ids::{Cdb, SlaveUuid};
use log::warn;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::device::BlockDevice;

pub struct PageCache {
    devices: Mutex<HashMap<SlaveUuid, Arc<dyn BlockDevice>>>,
}

impl PageCache {
    pub fn new() -> Self {
        PageCache {
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_device(&self, slave: SlaveUuid, device: Arc<dyn BlockDevice>) {
        self.devices.lock().unwrap().insert(slave, device);
    }

    fn device_for(&self, slave: SlaveUuid) -> Result<Arc<dyn BlockDevice>> {
        self.devices
            .lock()
            .unwrap()
            .get(&slave)
            .cloned()
            .ok_or_else(|| EngineError::Invalid(format!("no device registered for slave {slave}")))
    }

    /// Pin a single block, reading it up to date.
    pub fn pin(&self, cdb: Cdb) -> Result<PinnedBuffer> {
        let device = self.device_for(cdb.slave)?;
        let mut data = vec![0u8; device.block_size()];
        device.read_block(cdb.block, &mut data)?;
        Ok(PinnedBuffer {
            device,
            cdb,
            data,
            dirty: false,
            released: false,
        })
    }

    /// Pin a block without reading it, for a fresh allocation that will
    /// be fully overwritten before release.
    pub fn pin_fresh(&self, cdb: Cdb) -> Result<PinnedBuffer> {
        let device = self.device_for(cdb.slave)?;
        let data = vec![0u8; device.block_size()];
        Ok(PinnedBuffer {
            device,
            cdb,
            data,
            dirty: false,
            released: false,
        })
    }
}

impl Default for PageCache {
    fn default() -> Self {
        PageCache::new()
    }
}

/// An in-memory copy of one block, released (and flushed if dirty) on
/// drop or explicit `release()`.
pub struct PinnedBuffer {
    device: Arc<dyn BlockDevice>,
    cdb: Cdb,
    data: Vec<u8>,
    dirty: bool,
    released: bool,
}

impl PinnedBuffer {
    pub fn cdb(&self) -> Cdb {
        self.cdb
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn flush(&mut self) -> Result<()> {
        if self.dirty && !self.released {
            self.device.write_block(self.cdb.block, &self.data)?;
            self.dirty = false;
        }
        self.released = true;
        Ok(())
    }

    /// Explicit unlock/release, matching the original's
    /// dirty-then-unlock-then-put sequence on every completion path.
    pub fn release(mut self) -> Result<()> {
        self.flush()
    }
}

impl Drop for PinnedBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("failed to flush pinned buffer for {:?} on drop: {e}", self.cdb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InMemoryBlockDevice;

    #[test]
    fn pin_write_release_persists() {
        let cache = PageCache::new();
        let slave = uuid::Uuid::new_v4();
        let dev = Arc::new(InMemoryBlockDevice::new("slave0", 64, 4));
        cache.register_device(slave, dev.clone());

        let cdb = Cdb::new(slave, 1);
        let mut buf = cache.pin(cdb).unwrap();
        buf.bytes_mut().fill(0x42);
        buf.release().unwrap();

        let mut check = vec![0u8; 64];
        dev.read_block(1, &mut check).unwrap();
        assert!(check.iter().all(|b| *b == 0x42));
    }

    #[test]
    fn drop_without_mutation_does_not_write() {
        let cache = PageCache::new();
        let slave = uuid::Uuid::new_v4();
        let dev = Arc::new(InMemoryBlockDevice::new("slave0", 64, 4));
        cache.register_device(slave, dev.clone());

        {
            let _buf = cache.pin(Cdb::new(slave, 0)).unwrap();
        }
        let mut check = vec![0xFF; 64];
        dev.read_block(0, &mut check).unwrap();
        assert!(check.iter().all(|b| *b == 0));
    }
}
