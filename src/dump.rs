//! Pretty-printing helpers for engine state, used by the `inspect`
//! subcommand. Grounded on `examples/wtfrank-dump_btrfs`'s `dump.rs`
//! (`dump_sb`/`dump_node_header`), adapted from btrfs chunk/node dumping
//! to the version tree and superblock formats in `structures.rs`.

use crate::engine::Engine;
use crate::structures::{FsSuperblock, SlaveSuperblock};

fn uuid_str(bytes: &[u8; 16]) -> String {
    std::format!(
        "{}-{}-{}-{}-{}",
        hex::encode(&bytes[0..4]),
        hex::encode(&bytes[4..6]),
        hex::encode(&bytes[6..8]),
        hex::encode(&bytes[8..10]),
        hex::encode(&bytes[10..])
    )
}

pub fn dump_slave_superblock(sb: &SlaveSuperblock) {
    let used = sb.used;
    let size = sb.size;
    println!("slave uuid: {}", uuid_str(&sb.uuid));
    println!("  valid: {}  checksum ok: {}", sb.is_valid(), sb.verify_checksum());
    println!("  used: {used} / {size} blocks");
}

pub fn dump_fs_superblock(sb: &FsSuperblock) {
    let salt = sb.salt;
    let pepper = sb.pepper;
    println!(
        "fs superblock: valid={} checksum ok={} salt={salt} pepper={pepper}",
        sb.is_valid(),
        sb.verify_checksum()
    );
    println!("  fwd tree root: disk {} block {}", { sb.fwd_tree.disk1 }, { sb.fwd_tree.block1 });
    println!("  rev tree root: disk {} block {}", { sb.rev_tree.disk1 }, { sb.rev_tree.block1 });
}

/// Lists every known version with its parent, DFS o/r stamps, and
/// leaf/attached flags, ordered by pre-order stamp.
pub fn dump_version_tree(engine: &Engine) {
    let mut ids = engine.versions().all_ids();
    ids.sort_by_key(|id| engine.versions().read(*id).map(|v| v.o).unwrap_or(0));

    for id in ids {
        let Ok(info) = engine.versions().read(id) else { continue };
        println!(
            "version {:>4}  parent {:>4}  o={:<4} r={:<4}  leaf={:<5} attached={:<5} size={}",
            info.id, info.parent, info.o, info.r, info.is_leaf, info.is_attached, info.size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::{VersionKind, ROOT_VERSION};
    use crate::EngineConfig;

    #[test]
    fn dump_version_tree_does_not_panic_on_a_populated_tree() {
        let engine = Engine::new(EngineConfig::default());
        let v1 = engine.new_version(VersionKind::Snapshot, ROOT_VERSION, 1, 0).unwrap();
        let _v2 = engine.new_version(VersionKind::Snapshot, v1, 1, 0).unwrap();
        dump_version_tree(&engine);
    }
}
