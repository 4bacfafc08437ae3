//! `DaStore`: the versioned keyed associative store that the object
//! engine and transfer engine sit on top of. The exact on-disk B-tree
//! node layout of the forward tree is out of scope (it is an external
//! collaborator, per the system's purpose and scope); this provides the
//! same read/write/range contract with copy-on-write, nearest-ancestor
//! read semantics, indexed the way `examples/wtfrank-dump_btrfs`'s
//! `tree.rs`/`btrfs_node.rs` iterate a real B-tree (a cursor with
//! `has_next`/`next`/`skip`, pulled one entry at a time).

use crate::cvt::Cvt;
use crate::error::Result;
use crate::ids::VersionId;
use crate::key::BKey;
use crate::versions::VersionRegistry;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Wraps `BKey` so it can key a `BTreeMap` using the dimension-aware
/// ordering from `key::BKey::compare` rather than raw byte order (the
/// encoded buffer's header makes raw `memcmp` meaningless across keys of
/// different dimension lengths).
#[derive(Clone, Debug)]
struct StoredKey(BKey);

impl PartialEq for StoredKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.compare(&other.0).map(|o| o == Ordering::Equal).unwrap_or(false)
    }
}
impl Eq for StoredKey {}

impl PartialOrd for StoredKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for StoredKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.compare(&other.0).expect("keys in one DaStore share a schema")
    }
}

pub struct DaStore {
    versions: Arc<VersionRegistry>,
    entries: RwLock<BTreeMap<StoredKey, BTreeMap<VersionId, Cvt>>>,
}

impl DaStore {
    pub fn new(versions: Arc<VersionRegistry>) -> Self {
        DaStore {
            versions,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn put(&self, version: VersionId, key: BKey, cvt: Cvt) {
        let mut g = self.entries.write().unwrap();
        g.entry(StoredKey(key)).or_default().insert(version, cvt);
    }

    /// Resolve the value visible at `version`: the entry written at the
    /// nearest ancestor of (or at) `version` that wrote this key at all.
    fn resolve(&self, version: VersionId, versions_at_key: &BTreeMap<VersionId, Cvt>) -> Result<Option<(VersionId, Cvt)>> {
        let mut best: Option<VersionId> = None;
        for &candidate in versions_at_key.keys() {
            if self.versions.is_ancestor(candidate, version)? {
                best = match best {
                    None => Some(candidate),
                    Some(b) => {
                        if self.versions.compare(candidate, b)? == Ordering::Greater {
                            Some(candidate)
                        } else {
                            Some(b)
                        }
                    }
                };
            }
        }
        Ok(best.map(|v| (v, versions_at_key[&v].clone())))
    }

    pub fn get(&self, version: VersionId, key: &BKey) -> Result<Cvt> {
        let g = self.entries.read().unwrap();
        match g.get(&StoredKey(key.clone())) {
            Some(versions_at_key) => Ok(self.resolve(version, versions_at_key)?.map(|(_, c)| c).unwrap_or(Cvt::Invalid)),
            None => Ok(Cvt::Invalid),
        }
    }

    /// A simple lexicographic (B-tree-ordered) range cursor over
    /// `[start, end]`, resolved at `version`. The outer range iterator in
    /// `range.rs` layers the hyper-rectangle bounds check and `skip()`
    /// calls on top of this.
    pub fn range(&self, version: VersionId, start: &BKey, end: &BKey) -> Result<DaRangeIter> {
        let g = self.entries.read().unwrap();
        let mut out = Vec::new();
        for (k, versions_at_key) in g.iter() {
            if k.0.compare(start)? == Ordering::Less {
                continue;
            }
            if k.0.compare(end)? == Ordering::Greater {
                continue;
            }
            if let Some((vid, cvt)) = self.resolve(version, versions_at_key)? {
                out.push((k.0.clone(), vid, cvt));
            }
        }
        out.sort_by(|a, b| a.0.compare(&b.0).unwrap());
        Ok(DaRangeIter { entries: out, idx: 0 })
    }

    /// All entries visible at `version`, for the transfer engine to walk.
    pub fn entries_for_version(&self, version: VersionId) -> Result<Vec<(BKey, Cvt)>> {
        let g = self.entries.read().unwrap();
        let mut out = Vec::new();
        for (k, versions_at_key) in g.iter() {
            if let Some((_, cvt)) = self.resolve(version, versions_at_key)? {
                out.push((k.0.clone(), cvt));
            }
        }
        out.sort_by(|a, b| a.0.compare(&b.0).unwrap());
        Ok(out)
    }

    /// Overwrite the CVT for a key at a version in place, without
    /// changing visibility rules; used by the transfer engine once a
    /// block has been relocated to a new `cdb`.
    pub fn update_in_place(&self, version: VersionId, key: &BKey, cvt: Cvt) {
        let mut g = self.entries.write().unwrap();
        if let Some(versions_at_key) = g.get_mut(&StoredKey(key.clone())) {
            versions_at_key.insert(version, cvt);
        }
    }
}

/// The inner DA range iterator: ascending B-tree order, lexicographic
/// over the single-dimensional key, with no notion of the client's
/// hyper-rectangle.
pub struct DaRangeIter {
    entries: Vec<(BKey, VersionId, Cvt)>,
    idx: usize,
}

impl DaRangeIter {
    pub fn has_next(&self) -> bool {
        self.idx < self.entries.len()
    }

    pub fn next(&mut self) -> Option<(BKey, VersionId, Cvt)> {
        if self.idx < self.entries.len() {
            let e = self.entries[self.idx].clone();
            self.idx += 1;
            Some(e)
        } else {
            None
        }
    }

    /// Advance the cursor past every entry strictly less than `to`.
    pub fn skip(&mut self, to: &BKey) -> Result<()> {
        while self.idx < self.entries.len() {
            if self.entries[self.idx].0.compare(to)? == Ordering::Less {
                self.idx += 1;
            } else {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ObjectKey;
    use crate::versions::{VersionKind, ROOT_VERSION};

    fn bkey(dims: &[&[u8]]) -> BKey {
        BKey::encode(&ObjectKey::new(dims.iter().map(|d| d.to_vec()).collect()).unwrap())
    }

    #[test]
    fn cow_read_sees_nearest_ancestor() {
        let versions = Arc::new(VersionRegistry::default());
        let store = DaStore::new(versions.clone());
        let v1 = versions.new_version(VersionKind::Snapshot, ROOT_VERSION, 1, 0).unwrap();
        let v2 = versions.new_version(VersionKind::Snapshot, v1, 1, 0).unwrap();

        let k = bkey(&[b"x"]);
        store.put(v1, k.clone(), Cvt::Inline(b"from-v1".to_vec()));

        // v2 didn't write this key; it should see v1's value.
        assert_eq!(store.get(v2, &k).unwrap(), Cvt::Inline(b"from-v1".to_vec()));

        store.put(v2, k.clone(), Cvt::Inline(b"from-v2".to_vec()));
        assert_eq!(store.get(v2, &k).unwrap(), Cvt::Inline(b"from-v2".to_vec()));
        // v1 is unaffected by v2's write.
        assert_eq!(store.get(v1, &k).unwrap(), Cvt::Inline(b"from-v1".to_vec()));
    }

    #[test]
    fn range_is_ascending_and_bounded() {
        let versions = Arc::new(VersionRegistry::default());
        let store = DaStore::new(versions.clone());
        for d in [b"a".as_slice(), b"b", b"c", b"d"] {
            store.put(ROOT_VERSION, bkey(&[d]), Cvt::Inline(d.to_vec()));
        }
        let mut it = store.range(ROOT_VERSION, &bkey(&[b"b"]), &bkey(&[b"c"])).unwrap();
        let mut seen = Vec::new();
        while let Some((k, _, _)) = it.next() {
            seen.push(k.decode().dims[0].clone());
        }
        assert_eq!(seen, vec![b"b".to_vec(), b"c".to_vec()]);
    }
}
