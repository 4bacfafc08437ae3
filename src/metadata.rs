//! The append-only metadata store backing version-registry persistence
//! (§4.1, §6.1). Grounded on `examples/original_source/kernel/castle_versions.c`'s
//! mstore writeback/restore (`castle_vlist_entry`, `castle_versions_writeback`).

use crate::error::Result;
use crate::structures::VlistEntry;
use crate::versions::{VersionRegistry, ROOT_VERSION};
use std::sync::Mutex;

pub trait MetadataStore: Send + Sync {
    fn append(&self, entry: VlistEntry) -> Result<()>;
    fn read_all(&self) -> Result<Vec<VlistEntry>>;
}

/// An in-process stand-in for the on-disk append-only store; a real
/// deployment would back this with the slave devices themselves.
pub struct InMemoryMetadataStore {
    entries: Mutex<Vec<VlistEntry>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        InMemoryMetadataStore { entries: Mutex::new(Vec::new()) }
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn append(&self, entry: VlistEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<VlistEntry>> {
        Ok(self.entries.lock().unwrap().clone())
    }
}

/// Emit every known version as a `VlistEntry`, including the root (a
/// restore that doesn't see the root entry still works, since
/// `VersionRegistry::new` always bootstraps it, but writing it keeps the
/// store self-describing).
pub fn writeback(versions: &VersionRegistry, store: &dyn MetadataStore) -> Result<()> {
    for id in versions.all_ids() {
        let info = versions.read(id)?;
        store.append(VlistEntry {
            version_nr: info.id,
            parent: info.parent,
            size: info.size,
            da_id: info.da_id,
        })?;
    }
    Ok(())
}

/// Rebuild a `VersionRegistry` from a metadata store's entries.
pub fn restore(store: &dyn MetadataStore, max_versions: u32) -> Result<VersionRegistry> {
    let entries = store.read_all()?;
    let highest = entries.iter().map(|e| e.version_nr).max().unwrap_or(ROOT_VERSION);
    let registry = VersionRegistry::new(max_versions.max(highest + 1));
    for e in entries {
        if e.version_nr == ROOT_VERSION {
            continue;
        }
        registry.add(e.version_nr, e.parent, e.da_id, e.size);
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::VersionKind;

    #[test]
    fn writeback_then_restore_preserves_tree_shape() {
        let versions = VersionRegistry::default();
        let v1 = versions.new_version(VersionKind::Snapshot, ROOT_VERSION, 7, 100).unwrap();
        let v2 = versions.new_version(VersionKind::Snapshot, v1, 7, 0).unwrap();

        let store = InMemoryMetadataStore::new();
        writeback(&versions, &store).unwrap();

        let restored = restore(&store, 900).unwrap();
        assert!(restored.is_ancestor(ROOT_VERSION, v2).unwrap());
        assert!(restored.is_ancestor(v1, v2).unwrap());
        assert_eq!(restored.read(v1).unwrap().size, 100);
    }
}
