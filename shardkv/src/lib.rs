//! Core of a sharded, replicated key-value store layered on an external consensus engine.
//!
//! See `SPEC_FULL.md` at the workspace root for the full specification this crate implements.
//! The consensus engine, shard controller and RPC transport are external collaborators,
//! consumed through the [`consensus::ConsensusHandle`], [`controller::ShardCtrlClient`] and
//! [`network::PeerNetwork`] traits respectively; `shardkv-testkit` provides in-memory
//! implementations of all three for tests and local demos.

mod applier;
pub mod consensus;
pub mod controller;
pub mod error;
mod fetcher;
mod migration;
pub mod network;
pub mod op;
pub mod runtime_config;
pub mod server;
pub mod shard_config;
mod snapshot;
pub mod state;

pub use error::Err;
pub use op::Op;
pub use runtime_config::RuntimeConfig;
pub use server::Replica;
pub use shard_config::Config as ShardConfig;
pub use shard_config::{shard_of, GroupId, N_SHARDS};
