//! The block device surface. Grounded on `examples/wtfrank-dump_btrfs`'s
//! `mapped_file.rs` mmap technique, generalised from a read-only
//! inspection mapping to a read-write device backing, and on the "mirror
//! device" pass-through described in `EXTERNAL INTERFACES / device
//! surface`.

use crate::error::{EngineError, Result};
use libc::c_void;
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Mutex;

pub trait BlockDevice: Send + Sync {
    fn name(&self) -> &str;
    fn block_size(&self) -> usize;
    fn capacity_blocks(&self) -> u64;
    fn read_block(&self, block: u64, buf: &mut [u8]) -> Result<()>;
    fn write_block(&self, block: u64, buf: &[u8]) -> Result<()>;
}

/// A device backed by plain heap-allocated blocks; used in tests and
/// wherever a real block special file is unavailable.
pub struct InMemoryBlockDevice {
    name: String,
    block_size: usize,
    blocks: Mutex<Vec<Vec<u8>>>,
}

impl InMemoryBlockDevice {
    pub fn new(name: impl Into<String>, block_size: usize, capacity_blocks: u64) -> Self {
        InMemoryBlockDevice {
            name: name.into(),
            block_size,
            blocks: Mutex::new(vec![vec![0u8; block_size]; capacity_blocks as usize]),
        }
    }
}

impl BlockDevice for InMemoryBlockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn capacity_blocks(&self) -> u64 {
        self.blocks.lock().unwrap().len() as u64
    }

    fn read_block(&self, block: u64, buf: &mut [u8]) -> Result<()> {
        let blocks = self.blocks.lock().unwrap();
        let b = blocks
            .get(block as usize)
            .ok_or_else(|| EngineError::Invalid(format!("block {block} out of range on {}", self.name)))?;
        buf[..self.block_size].copy_from_slice(b);
        Ok(())
    }

    fn write_block(&self, block: u64, buf: &[u8]) -> Result<()> {
        let mut blocks = self.blocks.lock().unwrap();
        let b = blocks
            .get_mut(block as usize)
            .ok_or_else(|| EngineError::Invalid(format!("block {block} out of range on {}", self.name)))?;
        b.copy_from_slice(&buf[..self.block_size]);
        Ok(())
    }
}

/// A real block special file (or regular file standing in for one),
/// mapped read-write with `MAP_SHARED`. Adapted from `mapped_file::MappedFile`,
/// which maps `MAP_PRIVATE`/`PROT_READ` for read-only inspection; here we
/// need writes to land back on the device, so the mapping is shared.
pub struct MmapBlockDevice {
    name: String,
    block_size: usize,
    pointer: *mut c_void,
    mapping_len: usize,
    capacity_blocks: u64,
}

// SAFETY: the mapping is only ever accessed through read_block/write_block,
// which bounds-check and copy through a plain byte slice; no aliasing
// references to the mapping escape.
unsafe impl Send for MmapBlockDevice {}
unsafe impl Sync for MmapBlockDevice {}

impl MmapBlockDevice {
    pub fn open(path: &Path, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let md = file.metadata()?;
        let len = if md.is_file() {
            md.len() as usize
        } else {
            let mut len64: u64 = 0;
            let ret = unsafe { ioctls::blkgetsize64(file.as_raw_fd(), &mut len64 as *mut u64) };
            if ret != 0 {
                return Err(EngineError::Io(std::io::Error::last_os_error()));
            }
            len64 as usize
        };
        let ps = sysconf::page::pagesize();
        let mapping_len = ((len + ps - 1) / ps) * ps;
        let p = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(EngineError::Io(std::io::Error::last_os_error()));
        }
        Ok(MmapBlockDevice {
            name: path.display().to_string(),
            block_size,
            pointer: p,
            mapping_len,
            capacity_blocks: (len / block_size) as u64,
        })
    }
}

impl Drop for MmapBlockDevice {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.pointer, self.mapping_len);
        }
    }
}

impl BlockDevice for MmapBlockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn capacity_blocks(&self) -> u64 {
        self.capacity_blocks
    }

    fn read_block(&self, block: u64, buf: &mut [u8]) -> Result<()> {
        if block >= self.capacity_blocks {
            return Err(EngineError::Invalid(format!("block {block} out of range on {}", self.name)));
        }
        let offset = block as usize * self.block_size;
        unsafe {
            let src = std::slice::from_raw_parts(
                (self.pointer as usize + offset) as *const u8,
                self.block_size,
            );
            buf[..self.block_size].copy_from_slice(src);
        }
        Ok(())
    }

    fn write_block(&self, block: u64, buf: &[u8]) -> Result<()> {
        if block >= self.capacity_blocks {
            return Err(EngineError::Invalid(format!("block {block} out of range on {}", self.name)));
        }
        let offset = block as usize * self.block_size;
        unsafe {
            let dst = std::slice::from_raw_parts_mut(
                (self.pointer as usize + offset) as *mut u8,
                self.block_size,
            );
            dst.copy_from_slice(&buf[..self.block_size]);
        }
        Ok(())
    }
}

/// A pass-through device forwarding every read/write to an inner device
/// while presenting its own name, mirroring the original's
/// "castle-fs-<minor>" `dm` target.
pub struct MirrorDevice<D: BlockDevice> {
    name: String,
    inner: std::sync::Arc<D>,
}

impl<D: BlockDevice> MirrorDevice<D> {
    pub fn new(name: impl Into<String>, inner: std::sync::Arc<D>) -> Self {
        MirrorDevice { name: name.into(), inner }
    }
}

impl<D: BlockDevice> BlockDevice for MirrorDevice<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn capacity_blocks(&self) -> u64 {
        self.inner.capacity_blocks()
    }

    fn read_block(&self, block: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.read_block(block, buf)
    }

    fn write_block(&self, block: u64, buf: &[u8]) -> Result<()> {
        self.inner.write_block(block, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_round_trip() {
        let dev = InMemoryBlockDevice::new("slave0", 512, 4);
        let mut data = vec![0xAB; 512];
        dev.write_block(2, &data).unwrap();
        data.fill(0);
        dev.read_block(2, &mut data).unwrap();
        assert!(data.iter().all(|b| *b == 0xAB));
    }

    #[test]
    fn out_of_range_is_an_error() {
        let dev = InMemoryBlockDevice::new("slave0", 512, 1);
        let buf = vec![0u8; 512];
        assert!(dev.write_block(5, &buf).is_err());
    }

    #[test]
    fn mirror_forwards_to_inner() {
        let inner = std::sync::Arc::new(InMemoryBlockDevice::new("slave0", 512, 2));
        let mirror = MirrorDevice::new("castle-fs-0", inner.clone());
        let data = vec![0x11; 512];
        mirror.write_block(0, &data).unwrap();
        let mut out = vec![0u8; 512];
        inner.read_block(0, &mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(mirror.name(), "castle-fs-0");
    }
}
