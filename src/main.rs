use castellan::device::{BlockDevice, MmapBlockDevice};
use castellan::dump;
use castellan::freespace::SlaveRole;
use castellan::key::ObjectKey;
use castellan::versions::{VersionKind, ROOT_VERSION};
use castellan::{Engine, EngineConfig};
use clap::{Parser, Subcommand};

/// inspect and exercise a versioned, block-addressed storage engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Params {
    /// block-special files (or regular files standing in for them) to use as slaves
    #[clap(required = true)]
    paths: Vec<std::path::PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// mount the given slaves and dump the version tree
    Inspect,
    /// mount the given slaves, run a scripted snapshot/put/get, and dump the result
    Demo,
}

fn mount(engine: &Engine, paths: &[std::path::PathBuf], block_size: usize) -> anyhow::Result<()> {
    for (i, path) in paths.iter().enumerate() {
        let slave = uuid::Uuid::new_v4();
        let device = MmapBlockDevice::open(path, block_size)?;
        let capacity = device.capacity_blocks();
        let role = if i == 0 { SlaveRole::Target } else { SlaveRole::Spare };
        engine.register_slave(slave, std::sync::Arc::new(device), capacity, role);
        log::info!("mounted {} as slave {slave} ({capacity} blocks, {role:?})", path.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Params::parse();

    let engine = Engine::new(EngineConfig::default());
    mount(&engine, &args.paths, engine.config().block_size)?;

    match args.command {
        Command::Inspect => {
            dump::dump_version_tree(&engine);
        }
        Command::Demo => {
            let key = ObjectKey::new(vec![b"greeting".to_vec()])?;
            engine.replace(ROOT_VERSION, &key, b"hello, castellan".to_vec())?;

            let snapshot = engine.new_version(VersionKind::Snapshot, ROOT_VERSION, 0, 0)?;
            println!("created snapshot {snapshot} of root");

            match engine.get_all(snapshot, &key)? {
                Some(value) => println!("snapshot sees: {}", String::from_utf8_lossy(&value)),
                None => println!("snapshot sees nothing for {key:?}"),
            }

            dump::dump_version_tree(&engine);
        }
    }

    Ok(())
}
