//! The top-level `Engine`: confines the version registry, free-space
//! façade, page cache, store, and metadata store to a single owned value
//! rather than process-wide globals, per the Design Notes' "confine
//! global state to an engine value" guidance. This is the client-facing
//! surface described in `EXTERNAL INTERFACES / 6.3`.

use crate::cache::PageCache;
use crate::config::EngineConfig;
use crate::cvt::Cvt;
use crate::device::BlockDevice;
use crate::error::Result;
use crate::freespace::{AllocPolicy, FreeSpaceFacade, SlaveRole};
use crate::ids::{DaId, SlaveUuid, VersionId};
use crate::key::ObjectKey;
use crate::metadata::{InMemoryMetadataStore, MetadataStore};
use crate::objects::{GetResult, ObjectEngine, ReplaceMode};
use crate::range::{materialise, RangeQueryIter, RangeValue};
use crate::store::DaStore;
use crate::transfer::{TransferEngine, TransferStats};
use crate::versions::{VersionEvent, VersionInfo, VersionKind, VersionRegistry};
use std::sync::Arc;

pub struct Engine {
    config: EngineConfig,
    versions: Arc<VersionRegistry>,
    freespace: Arc<FreeSpaceFacade>,
    cache: Arc<PageCache>,
    store: Arc<DaStore>,
    metadata: Arc<dyn MetadataStore>,
    objects: ObjectEngine,
    transfer: TransferEngine,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let versions = Arc::new(VersionRegistry::new(config.max_versions));
        let freespace = Arc::new(FreeSpaceFacade::new());
        let cache = Arc::new(PageCache::new());
        let store = Arc::new(DaStore::new(versions.clone()));
        let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());

        let objects = ObjectEngine::new(config, freespace.clone(), cache.clone(), store.clone());
        let transfer = TransferEngine::new(store.clone(), freespace.clone(), cache.clone(), config);

        Engine { config, versions, freespace, cache, store, metadata, objects, transfer }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn versions(&self) -> &VersionRegistry {
        &self.versions
    }

    pub fn metadata(&self) -> &dyn MetadataStore {
        self.metadata.as_ref()
    }

    pub fn register_slave(&self, slave: SlaveUuid, device: Arc<dyn BlockDevice>, capacity_blocks: u64, role: SlaveRole) {
        self.freespace.register_slave(slave, capacity_blocks, role);
        self.cache.register_device(slave, device);
    }

    pub fn add_region(&self, slave: SlaveUuid, version: VersionId, length: u64) {
        self.freespace.add_region(slave, version, length);
    }

    // -- Version registry surface --

    pub fn new_version(&self, kind: VersionKind, parent: VersionId, da_id: DaId, size: u64) -> Result<VersionId> {
        self.versions.new_version(kind, parent, da_id, size)
    }

    pub fn attach(&self, version: VersionId) -> Result<()> {
        self.versions.attach(version)
    }

    pub fn detach(&self, version: VersionId) -> Result<()> {
        self.versions.detach(version)
    }

    pub fn read_version(&self, version: VersionId) -> Result<VersionInfo> {
        self.versions.read(version)
    }

    pub fn delete_version(&self, version: VersionId) -> Result<()> {
        self.versions.delete(version)
    }

    pub fn drain_version_events(&self) -> Vec<VersionEvent> {
        self.versions.drain_events()
    }

    // -- Object engine surface (§6.3) --

    /// Convenience over `ObjectEngine::replace` for callers with the
    /// whole payload in memory; wraps it in a `Cursor` so the object
    /// engine always writes through the same `std::io::Read`-driven
    /// path regardless of caller shape.
    pub fn replace(&self, version: VersionId, okey: &ObjectKey, value: Vec<u8>) -> Result<()> {
        let length = value.len() as u64;
        let mut source = std::io::Cursor::new(value);
        self.objects.replace(version, okey, ReplaceMode::Put { length, source: &mut source })
    }

    pub fn tombstone(&self, version: VersionId, okey: &ObjectKey) -> Result<()> {
        self.objects.replace(version, okey, ReplaceMode::Tombstone)
    }

    pub fn get(&self, version: VersionId, okey: &ObjectKey) -> Result<GetResult> {
        self.objects.get(version, okey)
    }

    pub fn get_all(&self, version: VersionId, okey: &ObjectKey) -> Result<Option<Vec<u8>>> {
        self.objects.get_all(version, okey)
    }

    pub fn slice_get(&self, version: VersionId, start: ObjectKey, end: ObjectKey) -> Result<Vec<RangeValue>> {
        let mut iter = RangeQueryIter::new(&self.store, version, start, end)?;
        let cache = self.cache.clone();
        materialise(&mut iter, self.config.range_response_buffer_bytes, self.config.block_size, move |cvt| {
            match cvt {
                Cvt::OnDisk { cdb, .. } => {
                    let buf = cache.pin(*cdb)?;
                    Ok(buf.bytes().to_vec())
                }
                _ => unreachable!("tombstones and non-ondisk values handled by materialise directly"),
            }
        })
    }

    // -- Transfer engine surface --

    pub fn transfer_create(&self, version: VersionId, policy: AllocPolicy) -> Result<TransferStats> {
        self.transfer.run(version, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InMemoryBlockDevice;
    use crate::versions::ROOT_VERSION;

    fn okey(d: &[u8]) -> ObjectKey {
        ObjectKey::new(vec![d.to_vec()]).unwrap()
    }

    fn test_engine() -> Engine {
        let engine = Engine::new(EngineConfig::default());
        let slave = uuid::Uuid::new_v4();
        let dev = Arc::new(InMemoryBlockDevice::new("slave0", engine.config().block_size, 1000));
        engine.register_slave(slave, dev, 1000, SlaveRole::Target);
        engine
    }

    #[test]
    fn end_to_end_snapshot_then_get() {
        let engine = test_engine();
        let v1 = engine.new_version(VersionKind::Snapshot, ROOT_VERSION, 1, 0).unwrap();
        engine.replace(v1, &okey(b"k"), b"hello".to_vec()).unwrap();
        assert_eq!(engine.get_all(v1, &okey(b"k")).unwrap(), Some(b"hello".to_vec()));

        let v2 = engine.new_version(VersionKind::Snapshot, v1, 1, 0).unwrap();
        assert_eq!(engine.get_all(v2, &okey(b"k")).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn slice_get_returns_inline_values_in_order() {
        let engine = test_engine();
        for d in [b"a".as_slice(), b"b", b"c"] {
            engine.replace(ROOT_VERSION, &okey(d), d.to_vec()).unwrap();
        }
        let values = engine.slice_get(ROOT_VERSION, okey(b"a"), okey(b"b")).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].value, b"a");
        assert_eq!(values[1].value, b"b");
    }
}
