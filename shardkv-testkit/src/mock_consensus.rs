//! An in-memory stand-in for the consensus engine (§6), playing the role `memstore::MemStore`
//! plays for `async_raft::RaftStorage` in `async-raft`'s own test suite.
//!
//! This is deliberately not a real replicated log: there is no election, no peer replication, and
//! `start` "commits" immediately by pushing straight onto the apply channel. It exists so the
//! core's own logic (front-end gating, applier dispatch, migration, snapshotting) can be exercised
//! without standing up a real consensus deployment. Tests that want to exercise leadership loss
//! use [`MockConsensus::set_leader`] to flip a replica out of leadership mid-flight.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use shardkv::consensus::ApplyMsg;
use shardkv::consensus::ConsensusHandle;
use shardkv::consensus::ProposeOutcome;
use shardkv::error::ProposeError;
use shardkv::Op;

struct Inner {
    term: u64,
    is_leader: bool,
    next_index: u64,
    last_included_index: u64,
    log_bytes: u64,
    last_snapshot_bytes: Option<Vec<u8>>,
    apply_tx: Option<mpsc::Sender<ApplyMsg>>,
}

pub struct MockConsensus {
    inner: Mutex<Inner>,
}

impl MockConsensus {
    /// Build a new single-node mock engine. Returns the handle plus the apply stream a
    /// [`shardkv::Replica`] should be spawned with.
    pub fn new(term: u64, is_leader: bool) -> (Arc<Self>, mpsc::Receiver<ApplyMsg>) {
        let (tx, rx) = mpsc::channel(4096);
        let inner = Inner {
            term,
            is_leader,
            next_index: 1,
            last_included_index: 0,
            log_bytes: 0,
            last_snapshot_bytes: None,
            apply_tx: Some(tx),
        };
        (Arc::new(Self { inner: Mutex::new(inner) }), rx)
    }

    pub async fn set_leader(&self, is_leader: bool) {
        self.inner.lock().await.is_leader = is_leader;
    }

    pub async fn bump_term(&self) {
        let mut inner = self.inner.lock().await;
        inner.term += 1;
    }

    /// The bytes passed to the most recent [`ConsensusHandle::snapshot`] call, if any. Lets tests
    /// simulate a restart by feeding the same bytes back through a fresh replica's apply stream.
    pub async fn last_snapshot_bytes(&self) -> Option<Vec<u8>> {
        self.inner.lock().await.last_snapshot_bytes.clone()
    }

    /// Push a snapshot-install message directly onto the apply stream, standing in for the
    /// InstallSnapshot RPC a real consensus engine would have driven during a restart.
    pub async fn deliver_snapshot(&self, bytes: Vec<u8>, index: u64, term: u64) {
        let tx = self.inner.lock().await.apply_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(ApplyMsg::Snapshot { snapshot: bytes, snapshot_index: index, snapshot_term: term }).await;
        }
    }
}

#[async_trait]
impl ConsensusHandle for MockConsensus {
    async fn start(&self, op: Op) -> Result<ProposeOutcome, ProposeError> {
        let (index, term, tx) = {
            let mut inner = self.inner.lock().await;
            if inner.apply_tx.is_none() {
                return Err(ProposeError::ShuttingDown);
            }
            if !inner.is_leader {
                return Err(ProposeError::NotLeader);
            }
            let index = inner.next_index;
            inner.next_index += 1;
            // Approximate growth so the snapshotter's ratio trigger has something to react to.
            inner.log_bytes += 96;
            (index, inner.term, inner.apply_tx.clone())
        };

        if let Some(tx) = tx {
            let _ = tx.send(ApplyMsg::Command { command: op, command_index: index }).await;
        }

        Ok(ProposeOutcome { index, term })
    }

    async fn get_state(&self) -> (u64, bool) {
        let inner = self.inner.lock().await;
        (inner.term, inner.is_leader)
    }

    async fn snapshot(&self, index: u64, bytes: Vec<u8>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.last_included_index = index;
        inner.log_bytes = 0;
        inner.last_snapshot_bytes = Some(bytes);
        Ok(())
    }

    async fn last_included_index(&self) -> u64 {
        self.inner.lock().await.last_included_index
    }

    async fn log_size_bytes(&self) -> u64 {
        self.inner.lock().await.log_bytes
    }

    async fn kill(&self) {
        // Dropping the sender closes the channel, which is what lets the applier's `recv` loop
        // terminate (§5 "Cancellation").
        self.inner.lock().await.apply_tx.take();
    }
}
