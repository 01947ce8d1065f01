//! faultgate: two-party mutual exclusion over one shared page
//!
//! Maps a POSIX shared memory object, fences it with PROT_NONE, and runs
//! payload cycles under the fault-driven page lock. Start one process per
//! participant with mirrored slot IDs:
//!
//!   faultgate 0 1 --region /demo --iterations 100000
//!   faultgate 1 0 --region /demo --iterations 100000

use anyhow::Context;
use clap::{Parser, ValueEnum};
use faultgate_core::ParticipantPair;
use faultgate_shm::{
    AcquireDriver, CycleMode, PayloadWorker, RegionBacking, RegionLock, SharedRegion, WorkerConfig,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "faultgate",
    version,
    about = "Two-party page lock driven by memory-protection faults"
)]
struct Cli {
    /// Flag slot owned by this process (0-15)
    self_id: u8,

    /// Flag slot watched for the peer (0-15)
    peer_id: u8,

    /// POSIX shared memory object name
    #[arg(long, default_value = "/faultgate", value_name = "NAME")]
    region: String,

    /// Map a private anonymous page instead of a named object (solo runs)
    #[arg(long, conflicts_with = "region")]
    anonymous: bool,

    /// Number of cycles to run; omit to run until killed
    #[arg(long, short = 'n', value_name = "COUNT")]
    iterations: Option<u64>,

    /// How much of each cycle runs while holding the lock
    #[arg(long, value_enum, default_value_t = ModeArg::Snapshot)]
    mode: ModeArg,

    /// Probe with explicit handshakes instead of arming the fault trap
    #[arg(long)]
    probe: bool,

    /// Attempt budget per acquisition when probing
    #[arg(long, default_value_t = u64::MAX, value_name = "COUNT")]
    max_attempts: u64,

    /// Pause between denied probes, microseconds
    #[arg(long, value_name = "MICROS")]
    retry_pause_us: Option<u64>,

    /// Unheld pause between snapshot copy-out and write-back, microseconds
    #[arg(long, value_name = "MICROS")]
    think_us: Option<u64>,

    /// Skip the sum-rule check
    #[arg(long)]
    no_verify: bool,

    /// Print a JSON run summary on stdout at exit
    #[arg(long)]
    stats_json: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info", value_name = "FILTER")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Verify and overwrite under one grant
    InPlace,
    /// Copy out, think unheld, write back under a second grant
    Snapshot,
}

impl From<ModeArg> for CycleMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::InPlace => CycleMode::InPlace,
            ModeArg::Snapshot => CycleMode::Snapshot,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // logs go to stderr so --stats-json stays parseable on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let pair = ParticipantPair::from_raw(cli.self_id, cli.peer_id)
        .context("participant configuration rejected")?;

    let backing = if cli.anonymous {
        RegionBacking::Anonymous
    } else {
        RegionBacking::Named(cli.region.clone())
    };
    let region = SharedRegion::open(backing).context("shared region unavailable")?;
    let base = format!("{:#x}", region.base_addr());
    info!(
        participant = %pair.local(),
        peer = %pair.peer(),
        base = %base,
        len = region.size(),
        created = region.was_created(),
        "region mapped and fenced"
    );

    let mut lock = RegionLock::new(region, pair);
    let driver = if cli.probe {
        AcquireDriver::Probe {
            max_attempts: cli.max_attempts,
            pause: cli.retry_pause_us.map(Duration::from_micros),
        }
    } else {
        lock.engage().context("fault trap installation failed")?;
        AcquireDriver::Fault
    };

    let config = WorkerConfig {
        mode: cli.mode.into(),
        driver,
        verify: !cli.no_verify,
        think_time: cli.think_us.map(Duration::from_micros),
    };

    let mut worker = PayloadWorker::new(lock, config);
    let outcome = worker.run(cli.iterations);

    let summary = worker.summary();
    info!(
        cycles = summary.cycles,
        grants = summary.grants,
        retries = summary.retries,
        "run complete"
    );
    if cli.stats_json {
        println!("{}", serde_json::to_string(&summary)?);
    }

    outcome.context("worker stopped on a protocol error")?;
    Ok(())
}
