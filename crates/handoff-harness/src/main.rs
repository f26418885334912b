//! Handoff simulation binary.
//!
//! Drives a simulated cluster with random operations over a faulty network,
//! then restores the network, resynchronises every machine and checks the
//! standard invariants. Runs are reproducible from the seed.
//!
//! # Usage
//!
//! ```bash
//! # Reliable network, default shape
//! handoff-sim --seed 7
//!
//! # Lossy network, first-come-first-served arbitration
//! handoff-sim --seed 7 --operations 2000 --drop-rate 0.1 --duplicate-rate 0.05 --policy fcfs
//! ```

use std::time::Duration;

use arbitrary::{Arbitrary, Unstructured};
use clap::{Parser, ValueEnum};
use handoff_client::ControllerConfig;
use handoff_harness::{
    Cluster, ClusterConfig, FaultConfig, InvariantRegistry, Operation, SystemSnapshot, WorldShape,
};
use handoff_server::{ConflictPolicy, ServerConfig};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Bytes of entropy fed to `Operation::arbitrary` per operation.
const OPERATION_ENTROPY: usize = 32;

/// Conflict policy selectable on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    /// Last write wins
    Lww,
    /// First come, first served
    Fcfs,
}

impl From<Policy> for ConflictPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Lww => Self::LastWriteWins,
            Policy::Fcfs => Self::FirstComeFirstServed,
        }
    }
}

/// Item handoff protocol simulator
#[derive(Parser, Debug)]
#[command(name = "handoff-sim")]
#[command(about = "Deterministic simulation of the item authority handoff protocol")]
#[command(version)]
struct Args {
    /// Seed for operations, delivery order and faults
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Number of participants (one machine each)
    #[arg(long, default_value = "3")]
    participants: usize,

    /// Input devices per participant
    #[arg(long, default_value = "2")]
    devices: usize,

    /// Number of shared items
    #[arg(long, default_value = "4")]
    items: usize,

    /// Random operations to run before recovery
    #[arg(long, default_value = "200")]
    operations: usize,

    /// Probability a frame is lost
    #[arg(long, default_value = "0.0")]
    drop_rate: f64,

    /// Probability a frame is delivered twice
    #[arg(long, default_value = "0.0")]
    duplicate_rate: f64,

    /// Server conflict policy
    #[arg(long, value_enum, default_value = "lww")]
    policy: Policy,

    /// Milliseconds a reclaim waits for a release confirmation
    #[arg(long, default_value = "2000")]
    release_timeout_ms: u64,

    /// Disable automatic hand-back of orphaned grants
    #[arg(long)]
    keep_orphans: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let release_timeout = Duration::from_millis(args.release_timeout_ms);
    let config = ClusterConfig {
        shape: WorldShape { participants: args.participants, devices: args.devices, items: args.items },
        seed: args.seed,
        faults: FaultConfig { drop_rate: args.drop_rate, duplicate_rate: args.duplicate_rate },
        server: ServerConfig {
            conflict_policy: args.policy.into(),
            release_timeout,
            ..Default::default()
        },
        controller: ControllerConfig {
            release_orphaned_grants: !args.keep_orphans,
            ..Default::default()
        },
    };

    tracing::info!(seed = args.seed, operations = args.operations, ?config, "simulation starting");

    let mut cluster = Cluster::new(config)?;
    let registry = InvariantRegistry::standard();
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed.wrapping_add(1));
    let mut entropy = [0u8; OPERATION_ENTROPY];
    let mut accepted = 0usize;

    for index in 0..args.operations {
        rng.fill_bytes(&mut entropy);
        let op = Operation::arbitrary(&mut Unstructured::new(&entropy))?;

        let result = cluster.apply(&op);
        tracing::debug!(index, ?op, ?result, "operation applied");
        if result.is_ok() {
            accepted += 1;
        }

        for _ in 0..rng.gen_range(0..8) {
            cluster.step();
        }
        if rng.gen_ratio(1, 10) {
            cluster.advance_time(Duration::from_millis(rng.gen_range(10..500)));
        }

        check(&registry, &cluster.snapshot(), "during run")?;
    }

    cluster.run_until_quiescent();
    cluster.restore_network();
    cluster.resync_all()?;
    cluster.run_until_quiescent();
    cluster.advance_time(release_timeout);
    cluster.run_until_quiescent();

    check(&registry, &cluster.snapshot(), "after recovery")?;

    let stats = cluster.network().stats();
    tracing::info!(
        accepted,
        rejected = args.operations - accepted,
        delivered = stats.delivered,
        dropped = stats.dropped,
        duplicated = stats.duplicated,
        handle_actions = cluster.handle_log().len(),
        reclaiming = cluster.server().handles().reclaiming(),
        "simulation converged"
    );

    Ok(())
}

fn check(
    registry: &InvariantRegistry,
    snapshot: &SystemSnapshot,
    phase: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let Err(violations) = registry.check_all(snapshot) else {
        return Ok(());
    };

    for violation in &violations {
        tracing::error!(phase, %violation, "invariant violated");
    }
    Err(format!("{} invariant violation(s) {phase}", violations.len()).into())
}
