//! TallyKV Binary
//!
//! Opens a data directory and drives the counter service: merge self-test,
//! concurrent load with verification, and one-shot reads and resets.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tallykv::harness::LoadPath;
use tallykv::{
    Config, CounterService, Engine, Harness, LoadPlan, StorageEngine, WalSyncStrategy,
    WriteStrategy,
};
use tracing_subscriber::{fmt, EnvFilter};

/// TallyKV
#[derive(Parser, Debug)]
#[command(name = "tallykv")]
#[command(about = "Durable counters over an embedded LSM engine, with load verification")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./tallykv_data")]
    data_dir: String,

    /// MemTable size limit in MB before flush
    #[arg(short = 'm', long, default_value = "64")]
    memtable_mb: usize,

    /// fsync the WAL every N entries (0 = every write)
    #[arg(long, default_value = "100")]
    sync_every: usize,

    /// Increment strategy: direct, batch, serialized or rmw
    #[arg(short, long, default_value = "direct")]
    strategy: WriteStrategy,

    /// How long a load waits for the counter to settle before verifying
    #[arg(long, default_value = "10000")]
    settle_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the counter family's merge operator accumulates
    SelfTest,

    /// Issue concurrent increments and verify the stored total
    Load {
        /// Total increments
        #[arg(short = 'n', long, default_value = "10000")]
        requests: u64,

        /// Worker threads
        #[arg(short, long, default_value = "64")]
        concurrency: usize,

        /// Sample the counter every N milliseconds while load runs
        #[arg(long)]
        sample_ms: Option<u64>,

        /// Use single-merge write batches instead of the strategy
        #[arg(long)]
        batch: bool,

        /// Keep the current value instead of resetting first
        #[arg(long)]
        keep: bool,
    },

    /// Print the stored and reference counts
    Get,

    /// Reset the counter to zero
    Reset,

    /// Read the probe value through the engine and from the cache
    Read,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tallykv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("TallyKV v{}", tallykv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> tallykv::Result<()> {
    let sync = match args.sync_every {
        0 => WalSyncStrategy::EveryWrite,
        count => WalSyncStrategy::EveryNEntries { count },
    };

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .wal_sync_strategy(sync)
        .write_strategy(args.strategy)
        .quiescence_timeout(Duration::from_millis(args.settle_timeout_ms))
        .build();

    let engine = Arc::new(Engine::open(config.clone())?);
    tracing::info!("Engine initialized successfully");

    let shared: Arc<dyn StorageEngine> = engine.clone();
    let outcome = match CounterService::new(shared, &config) {
        Ok(service) => {
            let service = Arc::new(service);
            let outcome = execute(args.command, &service, &config);
            service.shutdown();
            outcome
        }
        Err(e) => Err(e),
    };

    // Close on every path so the memtable is flushed even when the command failed
    let closed = match Arc::try_unwrap(engine) {
        Ok(engine) => engine.close(),
        Err(_) => {
            tracing::warn!("Engine still shared at exit, skipping close");
            Ok(())
        }
    };

    outcome?;
    closed?;

    tracing::info!("TallyKV stopped");
    Ok(())
}

fn execute(command: Commands, service: &Arc<CounterService>, config: &Config) -> tallykv::Result<()> {
    match command {
        // CounterService::new already ran it
        Commands::SelfTest => println!("merge self-test passed"),
        Commands::Load {
            requests,
            concurrency,
            sample_ms,
            batch,
            keep,
        } => {
            let mut plan = LoadPlan::new(requests, concurrency);
            if let Some(ms) = sample_ms {
                plan = plan.with_sampling(Duration::from_millis(ms));
            }
            if batch {
                plan = plan.with_path(LoadPath::BatchIncrement);
            }
            if keep {
                plan = plan.without_reset();
            }

            let harness = Harness::new(Arc::clone(service), config);
            let report = harness.run(plan)?;
            println!("{}", report);
            report.ensure_consistent()?;
        }
        Commands::Get => println!("{}", service.get()?),
        Commands::Reset => println!("{}", service.reset()?),
        Commands::Read => {
            println!("engine: {}", service.simple_read()?.unwrap_or_default());
            println!("cache:  {}", service.simple_read_cached().unwrap_or_default());
        }
    }
    Ok(())
}
