//! The version tree: snapshots, clones, ancestor tests via DFS pre/post
//! order. Grounded on `examples/original_source/kernel/castle_versions.c`
//! (`castle_versions_process`, `castle_version_is_ancestor`,
//! `castle_versions_insert`, `castle_version_new_create`).

use crate::error::{EngineError, Result};
use crate::ids::{DaId, VersionId};
use bitflags::bitflags;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const ROOT_VERSION: VersionId = 0;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VersionFlags: u8 {
        const INITED       = 1 << 0;
        const ATTACHED     = 1 << 1;
        const SNAPSHOT     = 1 << 2;
        const FTREE_LOCKED = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    Snapshot,
    Clone,
}

/// A public, read-only view of a version's attributes.
#[derive(Debug, Clone, Copy)]
pub struct VersionInfo {
    pub id: VersionId,
    pub parent: VersionId,
    pub da_id: DaId,
    pub size: u64,
    pub is_leaf: bool,
    pub is_attached: bool,
    pub o: u32,
    pub r: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionEvent {
    Created(VersionId),
    Destroyed(VersionId),
}

struct VersionNode {
    id: VersionId,
    parent_id: VersionId,
    da_id: DaId,
    size: u64,
    flags: VersionFlags,
    first_child: Option<VersionId>,
    next_sibling: Option<VersionId>,
    o: Option<u32>,
    r: Option<u32>,
}

impl VersionNode {
    fn is_leaf(&self) -> bool {
        self.first_child.is_none()
    }
}

struct RegistryInner {
    nodes: HashMap<VersionId, VersionNode>,
    init_queue: VecDeque<VersionId>,
    next_id: VersionId,
    max_versions: u32,
    events: Vec<VersionEvent>,
}

/// The tree of all versions. Single lock guards both the hash and the
/// DFS renumbering pass, matching the "held across hash mutation and
/// renumbering, released before emitting events" discipline of the
/// original's IRQ-safe spinlock (there being no interrupt context to
/// guard against in user space).
pub struct VersionRegistry {
    inner: Mutex<RegistryInner>,
}

impl VersionRegistry {
    pub fn new(max_versions: u32) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_VERSION,
            VersionNode {
                id: ROOT_VERSION,
                parent_id: ROOT_VERSION,
                da_id: 0,
                size: 0,
                flags: VersionFlags::INITED,
                first_child: None,
                next_sibling: None,
                o: Some(0),
                r: Some(0),
            },
        );
        let inner = RegistryInner {
            nodes,
            init_queue: VecDeque::new(),
            next_id: ROOT_VERSION + 1,
            max_versions,
            events: Vec::new(),
        };
        VersionRegistry {
            inner: Mutex::new(inner),
        }
    }

    /// Stage a new version and thread it into the tree. The id is
    /// consumed from the monotonic counter before the V3/V4 checks run,
    /// so a rejected snapshot/clone still burns an id and the next
    /// successful call gets the next integer up, matching the original's
    /// allocate-then-validate ordering in `castle_version_new_create`.
    pub fn new_version(&self, kind: VersionKind, parent: VersionId, da_id: DaId, size: u64) -> Result<VersionId> {
        let mut g = self.inner.lock().unwrap();

        let parent_node = g
            .nodes
            .get(&parent)
            .ok_or(EngineError::VersionNotFound(parent))?;

        let id = g.next_id;
        g.next_id += 1;
        if id >= g.max_versions {
            return Err(EngineError::VersionQuotaExceeded(g.max_versions));
        }

        match kind {
            VersionKind::Snapshot => {
                if !parent_node.is_leaf() {
                    return Err(EngineError::SnapshotOfNonLeaf(parent));
                }
            }
            VersionKind::Clone => {
                if parent_node.flags.contains(VersionFlags::ATTACHED) && parent_node.is_leaf() {
                    return Err(EngineError::CloneOfAttachedLeaf(parent));
                }
            }
        }

        let effective_size = if parent_node.size > 0 { parent_node.size } else { size };

        let flags = match kind {
            VersionKind::Snapshot => VersionFlags::SNAPSHOT,
            VersionKind::Clone => VersionFlags::empty(),
        };

        g.nodes.insert(
            id,
            VersionNode {
                id,
                parent_id: parent,
                da_id,
                size: effective_size,
                flags,
                first_child: None,
                next_sibling: None,
                o: None,
                r: None,
            },
        );
        g.init_queue.push_back(id);
        self.process_locked(&mut g);
        Ok(id)
    }

    /// Stage an already-known (id, parent, da_id, size) tuple without
    /// validation, as used when restoring from the metadata store.
    pub fn add(&self, id: VersionId, parent: VersionId, da_id: DaId, size: u64) {
        let mut g = self.inner.lock().unwrap();
        g.nodes.insert(
            id,
            VersionNode {
                id,
                parent_id: parent,
                da_id,
                size,
                flags: VersionFlags::empty(),
                first_child: None,
                next_sibling: None,
                o: None,
                r: None,
            },
        );
        g.init_queue.push_back(id);
        if id >= g.next_id {
            g.next_id = id + 1;
        }
        self.process_locked(&mut g);
    }

    fn process_locked(&self, g: &mut RegistryInner) {
        while let Some(id) = g.init_queue.pop_front() {
            Self::thread_one(g, id);
        }
        Self::renumber(g);
    }

    fn thread_one(g: &mut RegistryInner, id: VersionId) {
        if g.nodes.get(&id).map(|n| n.flags.contains(VersionFlags::INITED)) == Some(true) {
            return;
        }
        let parent_id = match g.nodes.get(&id) {
            Some(n) => n.parent_id,
            None => return,
        };
        if parent_id != id {
            let parent_inited = g
                .nodes
                .get(&parent_id)
                .map(|n| n.flags.contains(VersionFlags::INITED))
                .unwrap_or(false);
            if !parent_inited {
                // Parent hasn't been threaded yet; thread it first, then
                // resume this id (mirrors "push v back and retry with
                // parent" without needing a second queue).
                Self::thread_one(g, parent_id);
            }
            // insert into parent's sibling list, newest (highest id) first
            let old_head = g.nodes.get(&parent_id).and_then(|n| n.first_child);
            if let Some(node) = g.nodes.get_mut(&id) {
                node.next_sibling = old_head;
            }
            if let Some(parent) = g.nodes.get_mut(&parent_id) {
                parent.first_child = Some(id);
            }
        }
        if let Some(node) = g.nodes.get_mut(&id) {
            node.flags.insert(VersionFlags::INITED);
        }
        g.events.push(VersionEvent::Created(id));
    }

    /// Euler-tour style DFS numbering: every node gets a pre-visit stamp
    /// (`o`) and a post-visit stamp (`r`) drawn from one shared counter,
    /// so ancestry reduces to `a.o <= d.o <= a.r`.
    fn renumber(g: &mut RegistryInner) {
        let mut counter: u32 = 0;
        let mut stack: Vec<(VersionId, bool)> = vec![(ROOT_VERSION, false)];
        while let Some((id, post)) = stack.pop() {
            if post {
                if let Some(n) = g.nodes.get_mut(&id) {
                    n.r = Some(counter);
                }
                counter += 1;
            } else {
                if let Some(n) = g.nodes.get_mut(&id) {
                    n.o = Some(counter);
                }
                counter += 1;
                stack.push((id, true));
                let mut children = Vec::new();
                let mut cur = g.nodes.get(&id).and_then(|n| n.first_child);
                while let Some(c) = cur {
                    children.push(c);
                    cur = g.nodes.get(&c).and_then(|n| n.next_sibling);
                }
                for c in children.into_iter().rev() {
                    stack.push((c, false));
                }
            }
        }
    }

    pub fn read(&self, id: VersionId) -> Result<VersionInfo> {
        let g = self.inner.lock().unwrap();
        let n = g.nodes.get(&id).ok_or(EngineError::VersionNotFound(id))?;
        Ok(VersionInfo {
            id: n.id,
            parent: n.parent_id,
            da_id: n.da_id,
            size: n.size,
            is_leaf: n.is_leaf(),
            is_attached: n.flags.contains(VersionFlags::ATTACHED),
            o: n.o.unwrap_or(0),
            r: n.r.unwrap_or(0),
        })
    }

    pub fn attach(&self, id: VersionId) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let n = g.nodes.get_mut(&id).ok_or(EngineError::VersionNotFound(id))?;
        if n.flags.contains(VersionFlags::ATTACHED) {
            return Err(EngineError::AlreadyAttached(id));
        }
        n.flags.insert(VersionFlags::ATTACHED);
        Ok(())
    }

    pub fn detach(&self, id: VersionId) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        let n = g.nodes.get_mut(&id).ok_or(EngineError::VersionNotFound(id))?;
        n.flags.remove(VersionFlags::ATTACHED);
        Ok(())
    }

    pub fn is_ancestor(&self, ancestor: VersionId, descendant: VersionId) -> Result<bool> {
        let g = self.inner.lock().unwrap();
        let a = g.nodes.get(&ancestor).ok_or(EngineError::VersionNotFound(ancestor))?;
        let d = g
            .nodes
            .get(&descendant)
            .ok_or(EngineError::VersionNotFound(descendant))?;
        let (ao, ar, dord) = match (a.o, a.r, d.o) {
            (Some(ao), Some(ar), Some(dord)) => (ao, ar, dord),
            _ => return Err(EngineError::Invalid("version not inited".into())),
        };
        Ok(ao <= dord && dord <= ar)
    }

    /// Sign of `v1.o - v2.o`, i.e. their relative pre-order position.
    pub fn compare(&self, v1: VersionId, v2: VersionId) -> Result<std::cmp::Ordering> {
        let g = self.inner.lock().unwrap();
        let n1 = g.nodes.get(&v1).ok_or(EngineError::VersionNotFound(v1))?;
        let n2 = g.nodes.get(&v2).ok_or(EngineError::VersionNotFound(v2))?;
        let (o1, o2) = match (n1.o, n2.o) {
            (Some(o1), Some(o2)) => (o1, o2),
            _ => return Err(EngineError::Invalid("version not inited".into())),
        };
        Ok(o1.cmp(&o2))
    }

    /// Delete a single leaf, unattached version. Callers wishing to peel
    /// a dead chain upward call this repeatedly as each parent becomes a
    /// childless leaf.
    pub fn delete(&self, id: VersionId) -> Result<()> {
        if id == ROOT_VERSION {
            return Err(EngineError::Invalid("cannot delete the root version".into()));
        }
        let mut g = self.inner.lock().unwrap();
        let n = g.nodes.get(&id).ok_or(EngineError::VersionNotFound(id))?;
        if n.flags.contains(VersionFlags::ATTACHED) {
            return Err(EngineError::DeleteWhileAttached(id));
        }
        if !n.is_leaf() {
            return Err(EngineError::Invalid(format!("version {id} is not a leaf")));
        }
        let parent_id = n.parent_id;

        // unlink from parent's sibling list
        let mut cur = g.nodes.get(&parent_id).and_then(|p| p.first_child);
        let mut prev: Option<VersionId> = None;
        while let Some(c) = cur {
            let next = g.nodes.get(&c).and_then(|n| n.next_sibling);
            if c == id {
                match prev {
                    Some(p) => {
                        if let Some(pn) = g.nodes.get_mut(&p) {
                            pn.next_sibling = next;
                        }
                    }
                    None => {
                        if let Some(parent) = g.nodes.get_mut(&parent_id) {
                            parent.first_child = next;
                        }
                    }
                }
                break;
            }
            prev = Some(c);
            cur = next;
        }

        g.nodes.remove(&id);
        g.events.push(VersionEvent::Destroyed(id));
        Self::renumber(&mut g);
        Ok(())
    }

    /// All version ids currently known, for metadata-store writeback.
    pub fn all_ids(&self) -> Vec<VersionId> {
        let g = self.inner.lock().unwrap();
        g.nodes.keys().copied().collect()
    }

    /// Drain accumulated create/destroy events (released from the lock
    /// that guarded the mutation that produced them).
    pub fn drain_events(&self) -> Vec<VersionEvent> {
        let mut g = self.inner.lock().unwrap();
        std::mem::take(&mut g.events)
    }
}

impl Default for VersionRegistry {
    fn default() -> Self {
        VersionRegistry::new(900)
    }
}
