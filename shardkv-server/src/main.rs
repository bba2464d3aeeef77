//! Process wiring for a single replica (§2.1 "CLI / process wiring").
//!
//! This binary is ambient scaffolding, not a deployable cluster member: the consensus engine and
//! shard controller it drives are `shardkv-testkit`'s in-memory fakes, since this crate treats
//! both as external collaborators reached only through trait objects (§6). It exists so the core
//! can be exercised end-to-end from a terminal rather than only from `cargo test`.

use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;

use shardkv::runtime_config::RuntimeConfig;
use shardkv::server::Replica;
use shardkv::GroupId;
use shardkv_testkit::MockConsensus;
use shardkv_testkit::MockShardController;
use shardkv_testkit::MockNetwork;

#[derive(Parser, Debug)]
#[clap(author, about = "Run a single shardkv replica against in-memory collaborators")]
struct Args {
    /// Name this replica registers itself under in the (in-memory) peer network.
    #[clap(long, default_value = "replica-1")]
    name: String,

    /// Replica group id.
    #[clap(long, default_value_t = 1)]
    gid: GroupId,

    /// This replica's client id when it talks to itself as an internal collaborator
    /// (e.g. migration senders); any value is fine for a single-group demo.
    #[clap(long, default_value_t = 1)]
    client_id: i64,

    /// Negative disables snapshotting.
    #[clap(long, default_value_t = -1.0)]
    max_raft_state_bytes: f64,

    #[clap(long, default_value_t = 0.9)]
    snapshot_threshold_ratio: f64,

    #[clap(long, default_value_t = 50)]
    snapshot_trigger_interval: u64,

    #[clap(long, default_value_t = 50)]
    retry_pause_ms: u64,

    #[clap(long, default_value_t = 100)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let runtime = RuntimeConfig::build(args.name.clone())
        .max_raft_state_bytes(args.max_raft_state_bytes)
        .snapshot_threshold_ratio(args.snapshot_threshold_ratio)
        .snapshot_trigger_interval(args.snapshot_trigger_interval)
        .retry_pause(Duration::from_millis(args.retry_pause_ms))
        .poll_interval(Duration::from_millis(args.poll_interval_ms))
        .validate()
        .context("invalid runtime configuration")?;

    let (consensus, apply_rx) = MockConsensus::new(1, true);
    let controller = MockShardController::new();
    let network = MockNetwork::new();

    let replica = Replica::new(args.gid, args.client_id, runtime, consensus, controller, network.clone());
    replica.spawn(apply_rx);
    network.register(&args.name, replica.clone()).await;

    tracing::info!(name = %args.name, gid = args.gid, "replica started, awaiting shutdown signal");
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received, killing replica");
    replica.kill().await;

    Ok(())
}
