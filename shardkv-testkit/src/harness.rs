//! Test harness for wiring a small cluster of replica groups against the in-memory collaborators.
//!
//! Grounded on `async-raft`'s `tests/fixtures::RaftRouter`: one shared fake network and a method
//! per "bring a node online" step, so integration tests read as a script of cluster events rather
//! than plumbing.

use std::sync::Arc;

use shardkv::runtime_config::RuntimeConfig;
use shardkv::server::Replica;
use shardkv::GroupId;

use crate::mock_consensus::MockConsensus;
use crate::mock_controller::MockShardController;
use crate::mock_network::MockNetwork;

/// Initialize a `tracing` subscriber exactly once, honoring `RUST_LOG`. Safe to call from every
/// test; subsequent calls are no-ops.
pub fn init_tracing() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
    });
}

/// A single-replica group plus the mock consensus engine backing it, kept alive for the test's
/// duration.
pub struct TestGroup {
    pub gid: GroupId,
    pub server_name: String,
    pub replica: Arc<Replica>,
    pub consensus: Arc<MockConsensus>,
}

pub struct TestCluster {
    pub network: Arc<MockNetwork>,
    pub controller: Arc<MockShardController>,
    pub groups: Vec<TestGroup>,
}

impl TestCluster {
    pub fn new() -> Self {
        init_tracing();
        Self { network: MockNetwork::new(), controller: MockShardController::new(), groups: Vec::new() }
    }

    /// Bring one single-replica group online, registered under `server_name` in the shared
    /// network.
    pub async fn add_group(&mut self, gid: GroupId, server_name: &str) -> Arc<Replica> {
        let (consensus, apply_rx) = MockConsensus::new(1, true);
        let runtime = RuntimeConfig::build(server_name).validate().expect("test runtime config should validate");
        let replica = Replica::new(
            gid,
            gid as i64,
            runtime,
            consensus.clone(),
            self.controller.clone(),
            self.network.clone(),
        );
        replica.spawn(apply_rx);
        self.network.register(server_name, replica.clone()).await;
        self.groups.push(TestGroup {
            gid,
            server_name: server_name.to_string(),
            replica: replica.clone(),
            consensus,
        });
        replica
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}
