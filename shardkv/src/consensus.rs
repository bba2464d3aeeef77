//! The external consensus engine's interface, as consumed by this core (§6, §1 "Out of scope").
//!
//! This is the `async_raft::RaftStorage`/`async_raft::raft::Raft` boundary reduced to exactly the
//! surface this core needs: propose-and-learn-the-index (`start`), leadership/term polling
//! (`get_state`), and log compaction (`snapshot`/`last_included_index`). A real deployment backs
//! this trait with an actual replicated log; `shardkv-testkit` provides an in-memory stand-in for
//! tests, the way `memstore` stands in for `RaftStorage` in `async-raft`'s own test suite.

use async_trait::async_trait;

use crate::error::InternalResult;
use crate::error::ProposeError;
use crate::op::Op;

/// One message delivered on the consensus engine's apply stream (§6).
///
/// Precisely the shape of an MIT-6.824-style `applyCh` message: either a newly committed log
/// entry, or an instruction to install a snapshot wholesale.
#[derive(Debug)]
pub enum ApplyMsg {
    Command {
        command: Op,
        command_index: u64,
    },
    Snapshot {
        snapshot: Vec<u8>,
        snapshot_index: u64,
        snapshot_term: u64,
    },
}

/// The result of proposing an entry: the index/term it would occupy if and when committed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProposeOutcome {
    pub index: u64,
    pub term: u64,
}

/// The trait boundary this core consumes from the external consensus engine.
///
/// All methods are non-blocking with respect to the replicated log itself: `start` returns as
/// soon as the entry is queued for replication, it does not wait for commit. Waiting for commit
/// is the front-end's job, via the apply stream and the rendezvous table (§4.1).
#[async_trait]
pub trait ConsensusHandle: Send + Sync + 'static {
    /// Propose `op` to the log.
    async fn start(&self, op: Op) -> Result<ProposeOutcome, ProposeError>;

    /// Current term and whether this replica believes itself to be the leader.
    async fn get_state(&self) -> (u64, bool);

    /// Hand the engine a fresh snapshot covering the log up to and including `index`. The engine
    /// is free to compact its log up to that point.
    async fn snapshot(&self, index: u64, bytes: Vec<u8>) -> InternalResult<()>;

    /// The index of the last entry covered by the most recently installed/taken snapshot.
    async fn last_included_index(&self) -> u64;

    /// Approximate size in bytes of the engine's persisted log, used by the snapshotter (§4.6) to
    /// decide when to compact. Engines that do not track this may return `0`, which simply
    /// disables the ratio-based trigger (the applier's op-count trigger still fires).
    async fn log_size_bytes(&self) -> u64;

    /// Tear down the engine. After this returns, the apply stream handed out at construction
    /// time has been closed.
    async fn kill(&self);
}
