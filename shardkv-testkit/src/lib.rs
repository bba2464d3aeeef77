//! In-memory stand-ins for `shardkv`'s external collaborators (consensus engine, shard
//! controller, peer transport), plus a small harness for wiring them into a test cluster.
//!
//! Plays the role `memstore` plays for `async-raft`'s own test suite: nothing here is meant to be
//! production-grade, only deterministic and easy to drive from a unit or integration test.

mod harness;
mod mock_consensus;
mod mock_controller;
mod mock_network;

pub use harness::init_tracing;
pub use harness::TestCluster;
pub use harness::TestGroup;
pub use mock_consensus::MockConsensus;
pub use mock_controller::MockShardController;
pub use mock_network::MockNetwork;
