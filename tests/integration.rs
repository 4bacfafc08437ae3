//! End-to-end scenarios spanning the version tree, object engine, and
//! transfer engine together, in the style of
//! `examples/wtfrank-dump_btrfs`'s `tests/tree.rs`.

use castellan::device::InMemoryBlockDevice;
use castellan::freespace::{AllocPolicy, SlaveRole};
use castellan::key::ObjectKey;
use castellan::metadata::{writeback, InMemoryMetadataStore};
use castellan::versions::{VersionKind, ROOT_VERSION};
use castellan::{Engine, EngineConfig};
use std::sync::Arc;

fn key(dim: &[u8]) -> ObjectKey {
    ObjectKey::new(vec![dim.to_vec()]).unwrap()
}

fn engine_with_slave(config: EngineConfig, capacity_blocks: u64) -> (Engine, uuid::Uuid) {
    let engine = Engine::new(config);
    let slave = uuid::Uuid::new_v4();
    let device = Arc::new(InMemoryBlockDevice::new("slave0", config.block_size, capacity_blocks));
    engine.register_slave(slave, device, capacity_blocks, SlaveRole::Target);
    (engine, slave)
}

#[test]
fn snapshot_isolates_writes_from_its_parent() {
    let (engine, _slave) = engine_with_slave(EngineConfig::default(), 1000);

    engine.replace(ROOT_VERSION, &key(b"a"), b"root-value".to_vec()).unwrap();
    let v1 = engine.new_version(VersionKind::Snapshot, ROOT_VERSION, 0, 0).unwrap();

    // v1 inherits root's write until it makes its own.
    assert_eq!(engine.get_all(v1, &key(b"a")).unwrap(), Some(b"root-value".to_vec()));

    engine.replace(v1, &key(b"a"), b"v1-value".to_vec()).unwrap();
    assert_eq!(engine.get_all(v1, &key(b"a")).unwrap(), Some(b"v1-value".to_vec()));
    assert_eq!(engine.get_all(ROOT_VERSION, &key(b"a")).unwrap(), Some(b"root-value".to_vec()));
}

#[test]
fn cannot_snapshot_a_version_twice() {
    let (engine, _slave) = engine_with_slave(EngineConfig::default(), 1000);
    let _v1 = engine.new_version(VersionKind::Snapshot, ROOT_VERSION, 0, 0).unwrap();
    assert!(engine.new_version(VersionKind::Snapshot, ROOT_VERSION, 0, 0).is_err());
}

#[test]
fn attached_leaf_cannot_be_deleted_or_cloned_away() {
    let (engine, _slave) = engine_with_slave(EngineConfig::default(), 1000);
    let v1 = engine.new_version(VersionKind::Clone, ROOT_VERSION, 0, 0).unwrap();
    engine.attach(v1).unwrap();

    assert!(engine.new_version(VersionKind::Clone, v1, 0, 0).is_err());
    assert!(engine.delete_version(v1).is_err());

    engine.detach(v1).unwrap();
    engine.delete_version(v1).unwrap();
}

#[test]
fn large_payload_streams_through_get_and_relocates_under_transfer() {
    let config = EngineConfig { block_size: 128, max_inline_value: 16, obj_io_max_buffer_blocks: 3, ..Default::default() };
    let engine = Engine::new(config);

    // Only a spare slave exists while the value is written, so it has to
    // land there regardless of allocation order.
    let spare = uuid::Uuid::new_v4();
    engine.register_slave(spare, Arc::new(InMemoryBlockDevice::new("spare", config.block_size, 200)), 200, SlaveRole::Spare);

    let payload: Vec<u8> = (0..2000u32).map(|i| (i % 256) as u8).collect();
    engine.replace(ROOT_VERSION, &key(b"blob"), payload.clone()).unwrap();
    assert_eq!(engine.get_all(ROOT_VERSION, &key(b"blob")).unwrap(), Some(payload.clone()));

    let target = uuid::Uuid::new_v4();
    engine.register_slave(target, Arc::new(InMemoryBlockDevice::new("target", config.block_size, 200)), 200, SlaveRole::Target);

    let stats = engine.transfer_create(ROOT_VERSION, AllocPolicy::ToTarget).unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.moved, 1);
    assert_eq!(engine.get_all(ROOT_VERSION, &key(b"blob")).unwrap(), Some(payload));
}

#[test]
fn slice_get_returns_an_ordered_window_and_skips_tombstones() {
    let (engine, _slave) = engine_with_slave(EngineConfig::default(), 1000);

    for d in [b"a".as_slice(), b"b", b"c", b"d"] {
        engine.replace(ROOT_VERSION, &key(d), d.to_vec()).unwrap();
    }
    engine.tombstone(ROOT_VERSION, &key(b"b")).unwrap();

    let values = engine.slice_get(ROOT_VERSION, key(b"a"), key(b"d")).unwrap();
    let seen: Vec<Vec<u8>> = values.into_iter().map(|v| v.value).collect();
    assert_eq!(seen, vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]);
}

#[test]
fn version_tree_survives_a_metadata_writeback_and_restore_round_trip() {
    let (engine, _slave) = engine_with_slave(EngineConfig::default(), 1000);
    let v1 = engine.new_version(VersionKind::Snapshot, ROOT_VERSION, 7, 4096).unwrap();
    let v2 = engine.new_version(VersionKind::Snapshot, v1, 7, 0).unwrap();

    let store = InMemoryMetadataStore::new();
    writeback(engine.versions(), &store).unwrap();

    let restored = castellan::metadata::restore(&store, 900).unwrap();
    assert!(restored.is_ancestor(ROOT_VERSION, v2).unwrap());
    assert!(restored.is_ancestor(v1, v2).unwrap());
    assert_eq!(restored.read(v1).unwrap().size, 4096);
}
