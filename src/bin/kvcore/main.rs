//! `kvcore` CLI: `create` prepares a new
//! database directory, `serve` runs the engine against an existing one,
//! `admin` carries one-off maintenance commands. Flags follow the
//! teacher's `structopt`-derived bin pattern (`required-features`-gated
//! bins under `src/bin/` in the upstream crate family this engine is
//! drawn from).

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use log::{error, info};
use structopt::StructOpt;

use kvcore::backup;
use kvcore::config::Config;
use kvcore::iface::{self, MemcacheOps};
use kvcore::kv::{KvStore, SliceStores};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(StructOpt)]
#[structopt(name = "kvcore", about = "embedded key/value storage engine")]
enum Cli {
    /// Prepare a new database directory.
    Create {
        #[structopt(long, parse(from_os_str))]
        dir: PathBuf,
        #[structopt(long, default_value = "8")]
        slices: usize,
        #[structopt(long, default_value = "4096")]
        block_size: u32,
        #[structopt(long, default_value = "4194304")]
        extent_size: u64,
        #[structopt(long)]
        force_create: bool,
    },
    /// Run the engine against an existing database directory.
    Serve {
        #[structopt(long, parse(from_os_str))]
        dir: PathBuf,
        #[structopt(long, default_value = "11211")]
        port: u16,
        #[structopt(long, default_value = "67108864")]
        cache_size: usize,
        #[structopt(long, default_value = "80")]
        gc_high_ratio: usize,
    },
    /// Administrative maintenance commands.
    Admin {
        #[structopt(subcommand)]
        cmd: AdminCmd,
    },
}

#[derive(StructOpt)]
enum AdminCmd {
    /// Run one garbage-collection pass over a slice's store and exit.
    Gc {
        #[structopt(long, parse(from_os_str))]
        dir: PathBuf,
        #[structopt(long, default_value = "8")]
        slices: usize,
    },
    /// Export every slice's live entries to a directory of flat files.
    Export {
        #[structopt(long, parse(from_os_str))]
        dir: PathBuf,
        #[structopt(long, parse(from_os_str))]
        out: PathBuf,
        #[structopt(long, default_value = "8")]
        slices: usize,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::from_args();
    if let Err(err) = run(cli) {
        error!("kvcore: {}", err);
        process::exit(1);
    }
}

fn run(cli: Cli) -> kvcore::Result<()> {
    match cli {
        Cli::Create {
            dir,
            slices,
            block_size,
            extent_size,
            force_create,
        } => cmd_create(dir, slices, block_size, extent_size, force_create),
        Cli::Serve {
            dir,
            port,
            cache_size,
            gc_high_ratio,
        } => cmd_serve(dir, port, cache_size, gc_high_ratio),
        Cli::Admin { cmd } => match cmd {
            AdminCmd::Gc { dir, slices } => cmd_admin_gc(dir, slices),
            AdminCmd::Export { dir, out, slices } => cmd_admin_export(dir, out, slices),
        },
    }
}

fn engine_config(dir: PathBuf, slices: usize) -> Config {
    Config {
        dir: dir.to_string_lossy().into_owned(),
        num_slices: slices,
        ..Config::default()
    }
}

fn cmd_create(dir: PathBuf, slices: usize, block_size: u32, extent_size: u64, force_create: bool) -> kvcore::Result<()> {
    if dir.exists() && dir.read_dir().map(|mut it| it.next().is_some()).unwrap_or(false) && !force_create {
        error!("kvcore: {:?} is not empty; pass --force-create to reinitialize", dir);
        process::exit(1);
    }
    let _ = extent_size; // no `Config` counterpart; the store's own default extent capacity applies
    let mut config = engine_config(dir, slices);
    config.leaf_blocksize = block_size as usize;
    config.validate()?;

    let _stores = SliceStores::create(&config)?;
    info!("kvcore: created database at {} with {} slices", config.dir, config.num_slices);
    Ok(())
}

fn cmd_serve(dir: PathBuf, _port: u16, cache_size: usize, gc_high_ratio: usize) -> kvcore::Result<()> {
    let mut config = engine_config(dir, Config::NUM_SLICES);
    config.gc_high_ratio = gc_high_ratio;
    config.cache_size = cache_size;
    config.validate()?;

    // A server process owns its SliceStores for its entire lifetime, so
    // leaking it to get the `'static` bound `KvStore<'static>` (and, in
    // turn, `Arc<dyn MemcacheOps>`) needs is the same "singleton that
    // outlives everything" shape a long-running service already has.
    let stores: &'static SliceStores = Box::leak(Box::new(SliceStores::open(&config)?));
    let engine: &'static KvStore<'static> = Box::leak(Box::new(KvStore::open(stores, &config)));
    iface::set_store_interface(Arc::new(PhantomEngine(engine)));

    info!("kvcore: serving {:?} ({} slices)", config.dir, engine.num_slices());
    // The memcached text-protocol front end is out of scope here; this binary's `serve`
    // installs the store interface and idles until interrupted, mirroring
    // a reference front end driving `iface::get_store()`.
    loop {
        std::thread::park();
    }
}

/// Thin `'static` wrapper so `KvStore<'static>`'s `MemcacheOps` impl can be
/// reached through a reference rather than requiring `KvStore` itself to
/// be moved into the `Arc`.
struct PhantomEngine(&'static KvStore<'static>);

impl MemcacheOps for PhantomEngine {
    fn mc_get(&self, key: &[u8]) -> kvcore::Result<Option<(Vec<u8>, kvcore::entry::Timestamp)>> {
        self.0.mc_get(key)
    }
    fn mc_rget(
        &self,
        start: std::ops::Bound<Vec<u8>>,
        end: std::ops::Bound<Vec<u8>>,
        max: usize,
    ) -> kvcore::Result<(Vec<(Vec<u8>, kvcore::entry::Value, kvcore::entry::Timestamp)>, bool)> {
        self.0.mc_rget(start, end, max)
    }
    fn mc_set(&self, key: &[u8], value: Vec<u8>) -> kvcore::Result<kvcore::btree::Outcome> {
        self.0.mc_set(key, value)
    }
    fn mc_add(&self, key: &[u8], value: Vec<u8>) -> kvcore::Result<kvcore::btree::Outcome> {
        self.0.mc_add(key, value)
    }
    fn mc_replace(&self, key: &[u8], value: Vec<u8>) -> kvcore::Result<kvcore::btree::Outcome> {
        self.0.mc_replace(key, value)
    }
    fn mc_append(&self, key: &[u8], suffix: Vec<u8>) -> kvcore::Result<kvcore::btree::Outcome> {
        self.0.mc_append(key, suffix)
    }
    fn mc_prepend(&self, key: &[u8], prefix: Vec<u8>) -> kvcore::Result<kvcore::btree::Outcome> {
        self.0.mc_prepend(key, prefix)
    }
    fn mc_cas(&self, key: &[u8], value: Vec<u8>, expected_cas: u64) -> kvcore::Result<kvcore::btree::Outcome> {
        self.0.mc_cas(key, value, expected_cas)
    }
    fn mc_incr(&self, key: &[u8], delta: u64) -> kvcore::Result<kvcore::btree::Outcome> {
        self.0.mc_incr(key, delta)
    }
    fn mc_decr(&self, key: &[u8], delta: u64) -> kvcore::Result<kvcore::btree::Outcome> {
        self.0.mc_decr(key, delta)
    }
    fn mc_delete(&self, key: &[u8]) -> kvcore::Result<kvcore::btree::Outcome> {
        self.0.mc_delete(key)
    }
    fn mc_stats(&self) -> Vec<(String, String)> {
        self.0.mc_stats()
    }
    fn mc_version(&self) -> &'static str {
        self.0.mc_version()
    }
}

fn cmd_admin_gc(dir: PathBuf, slices: usize) -> kvcore::Result<()> {
    let config = engine_config(dir, slices);
    let stores = SliceStores::open(&config)?;
    for (i, store) in stores.slices.iter().enumerate() {
        let reports = store.gc_pass()?;
        info!("kvcore: admin gc slice {}: {:?}", i, reports);
    }
    Ok(())
}

fn cmd_admin_export(dir: PathBuf, out: PathBuf, slices: usize) -> kvcore::Result<()> {
    std::fs::create_dir_all(&out)?;
    let config = engine_config(dir, slices);
    let stores = SliceStores::open(&config)?;
    let engine = KvStore::open(&stores, &config);
    for i in 0..engine.num_slices() {
        let mut file = std::fs::File::create(out.join(format!("slice-{}.bak", i)))?;
        let count = backup::export_slice(engine.slice(i), &mut file)?;
        info!("kvcore: admin export slice {}: {} entries", i, count);
    }
    Ok(())
}
