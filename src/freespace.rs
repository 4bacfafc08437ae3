//! Free-space allocation, scoped per (version, slave). Grounded on
//! `examples/original_source/kernel/castle_transfer.c`
//! (`castle_transfer_get_destination`, `castle_regions_get`) for the
//! to-target/to-region destination-selection policies.

use crate::error::{EngineError, Result};
use crate::ids::{BlockIndex, Cdb, SlaveUuid, VersionId};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveRole {
    Target,
    Spare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocPolicy {
    /// Any slave with free space (the ordinary object-engine put path).
    Any,
    /// Restricted to slaves flagged `Target` (transfer engine, direction
    /// to-target).
    ToTarget,
    /// Restricted to the region table for the version being transferred
    /// (transfer engine, direction to-region).
    ToRegion,
}

#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub slave: SlaveUuid,
    pub version: VersionId,
    pub length: u64,
}

struct SlaveState {
    role: SlaveRole,
    capacity: u64,
    /// Next never-yet-used block; bump-allocated.
    next_free: u64,
    /// Single blocks returned by `free()`; reused by `get()` but not by
    /// `get_contiguous()`, which needs an unbroken run.
    released: Vec<BlockIndex>,
}

impl SlaveState {
    fn free_count(&self) -> u64 {
        (self.capacity - self.next_free) + self.released.len() as u64
    }
}

struct Inner {
    slaves: HashMap<SlaveUuid, SlaveState>,
    regions: Vec<Region>,
    /// Blocks currently attributed to (version, slave); consulted by the
    /// to-region quota check.
    usage: HashMap<(VersionId, SlaveUuid), u64>,
}

pub struct FreeSpaceFacade {
    inner: Mutex<Inner>,
}

impl FreeSpaceFacade {
    pub fn new() -> Self {
        FreeSpaceFacade {
            inner: Mutex::new(Inner {
                slaves: HashMap::new(),
                regions: Vec::new(),
                usage: HashMap::new(),
            }),
        }
    }

    pub fn register_slave(&self, slave: SlaveUuid, capacity: u64, role: SlaveRole) {
        let mut g = self.inner.lock().unwrap();
        g.slaves.insert(
            slave,
            SlaveState {
                role,
                capacity,
                next_free: 0,
                released: Vec::new(),
            },
        );
    }

    pub fn add_region(&self, slave: SlaveUuid, version: VersionId, length: u64) {
        let mut g = self.inner.lock().unwrap();
        g.regions.push(Region { slave, version, length });
    }

    pub fn blks_for_version_get(&self, slave: SlaveUuid, version: VersionId) -> u64 {
        let g = self.inner.lock().unwrap();
        *g.usage.get(&(version, slave)).unwrap_or(&0)
    }

    fn candidate_slave(g: &Inner, version: VersionId, policy: AllocPolicy, need: u64) -> Option<SlaveUuid> {
        match policy {
            AllocPolicy::Any => g.slaves.iter().find(|(_, s)| s.free_count() >= need).map(|(u, _)| *u),
            AllocPolicy::ToTarget => g
                .slaves
                .iter()
                .find(|(_, s)| s.role == SlaveRole::Target && s.free_count() >= need)
                .map(|(u, _)| *u),
            AllocPolicy::ToRegion => {
                // Snapshot the region list up front so the quota check
                // below sees one consistent view, rather than re-walking
                // a mutable table (removes the "region added mid-walk"
                // race the original's unlocked `castle_regions_get` has).
                let regions: Vec<Region> = g.regions.iter().filter(|r| r.version == version).cloned().collect();
                regions
                    .into_iter()
                    .find(|r| {
                        let used = *g.usage.get(&(version, r.slave)).unwrap_or(&0);
                        used < r.length && g.slaves.get(&r.slave).map(|s| s.free_count() >= need).unwrap_or(false)
                    })
                    .map(|r| r.slave)
            }
        }
    }

    pub fn get(&self, version: VersionId, policy: AllocPolicy) -> Result<Cdb> {
        let mut g = self.inner.lock().unwrap();
        let slave = Self::candidate_slave(&g, version, policy, 1).ok_or(EngineError::NoSpace)?;
        let state = g.slaves.get_mut(&slave).unwrap();
        let block = match state.released.pop() {
            Some(b) => b,
            None => {
                let b = state.next_free;
                state.next_free += 1;
                b
            }
        };
        *g.usage.entry((version, slave)).or_insert(0) += 1;
        Ok(Cdb::new(slave, block))
    }

    /// Allocate `nr_blocks` contiguous blocks on a single slave, for an
    /// on-disk object whose window arithmetic assumes `(slave, block+i)`
    /// addressing.
    pub fn get_contiguous(&self, version: VersionId, policy: AllocPolicy, nr_blocks: u64) -> Result<Cdb> {
        if nr_blocks == 0 {
            return Err(EngineError::Invalid("cannot allocate zero blocks".into()));
        }
        let mut g = self.inner.lock().unwrap();
        let slave = g
            .slaves
            .iter()
            .filter(|(_, s)| match policy {
                AllocPolicy::Any => true,
                AllocPolicy::ToTarget => s.role == SlaveRole::Target,
                AllocPolicy::ToRegion => true,
            })
            .find(|(_, s)| s.capacity - s.next_free >= nr_blocks)
            .map(|(u, _)| *u)
            .ok_or(EngineError::NoSpace)?;
        let state = g.slaves.get_mut(&slave).unwrap();
        let start = state.next_free;
        state.next_free += nr_blocks;
        *g.usage.entry((version, slave)).or_insert(0) += nr_blocks;
        Ok(Cdb::new(slave, start))
    }

    pub fn free(&self, cdb: Cdb, version: VersionId, nr_blocks: u64) -> Result<()> {
        if cdb.is_invalid() {
            return Err(EngineError::Invalid("cannot free an invalid cdb".into()));
        }
        let mut g = self.inner.lock().unwrap();
        let state = g
            .slaves
            .get_mut(&cdb.slave)
            .ok_or_else(|| EngineError::Invalid("unknown slave".into()))?;
        for i in 0..nr_blocks {
            state.released.push(cdb.block + i);
        }
        if let Some(used) = g.usage.get_mut(&(version, cdb.slave)) {
            *used = used.saturating_sub(nr_blocks);
        }
        Ok(())
    }

    /// Whether `slave` belongs to the destination set implied by
    /// `policy` for `version` — used by the transfer engine to decide if
    /// a block needs moving at all.
    pub fn is_on_destination_set(&self, slave: SlaveUuid, version: VersionId, policy: AllocPolicy) -> bool {
        let g = self.inner.lock().unwrap();
        match policy {
            AllocPolicy::Any => true,
            AllocPolicy::ToTarget => g.slaves.get(&slave).map(|s| s.role == SlaveRole::Target).unwrap_or(false),
            AllocPolicy::ToRegion => g.regions.iter().any(|r| r.version == version && r.slave == slave),
        }
    }
}

impl Default for FreeSpaceFacade {
    fn default() -> Self {
        FreeSpaceFacade::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_round_trip() {
        let fs = FreeSpaceFacade::new();
        let slave = uuid::Uuid::new_v4();
        fs.register_slave(slave, 4, SlaveRole::Target);

        let cdb = fs.get(1, AllocPolicy::Any).unwrap();
        assert_eq!(fs.blks_for_version_get(slave, 1), 1);
        fs.free(cdb, 1, 1).unwrap();
        assert_eq!(fs.blks_for_version_get(slave, 1), 0);
    }

    #[test]
    fn exhausted_slave_yields_no_space() {
        let fs = FreeSpaceFacade::new();
        let slave = uuid::Uuid::new_v4();
        fs.register_slave(slave, 1, SlaveRole::Target);
        fs.get(1, AllocPolicy::Any).unwrap();
        assert!(matches!(fs.get(1, AllocPolicy::Any), Err(EngineError::NoSpace)));
    }

    #[test]
    fn to_target_skips_spares() {
        let fs = FreeSpaceFacade::new();
        let spare = uuid::Uuid::new_v4();
        let target = uuid::Uuid::new_v4();
        fs.register_slave(spare, 4, SlaveRole::Spare);
        fs.register_slave(target, 4, SlaveRole::Target);

        let cdb = fs.get(1, AllocPolicy::ToTarget).unwrap();
        assert_eq!(cdb.slave, target);
    }

    #[test]
    fn to_region_respects_quota() {
        let fs = FreeSpaceFacade::new();
        let slave = uuid::Uuid::new_v4();
        fs.register_slave(slave, 4, SlaveRole::Spare);
        fs.add_region(slave, 1, 1);

        let _cdb = fs.get(1, AllocPolicy::ToRegion).unwrap();
        assert!(matches!(fs.get(1, AllocPolicy::ToRegion), Err(EngineError::NoSpace)));
    }

    #[test]
    fn contiguous_allocation_is_sequential() {
        let fs = FreeSpaceFacade::new();
        let slave = uuid::Uuid::new_v4();
        fs.register_slave(slave, 32, SlaveRole::Target);
        let cdb = fs.get_contiguous(1, AllocPolicy::Any, 7).unwrap();
        assert_eq!(cdb.block, 0);
        let cdb2 = fs.get_contiguous(1, AllocPolicy::Any, 3).unwrap();
        assert_eq!(cdb2.block, 7);
    }
}
