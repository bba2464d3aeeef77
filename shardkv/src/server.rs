//! The front-end (§4.1) and the shared per-replica state it, the applier, and the migration
//! engine all operate on.
//!
//! `Replica` plays the role `RaftCore` plays in `async-raft`: one struct owning everything a
//! single replica needs, spawned once, cloned via `Arc` into every task that needs to see it.
//! Unlike `RaftCore`, there is no single-task-owns-everything model here — the spec requires
//! several cooperating tasks (front-end handlers, applier, fetcher, snapshotter, per-peer
//! senders) to share state through one mutex (§5), so `Replica` is `Arc<Mutex<ReplicaState>>` plus
//! the handles to the external collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tracing::Instrument;

use crate::consensus::ApplyMsg;
use crate::consensus::ConsensusHandle;
use crate::controller::ShardCtrlClient;
use crate::error::Err;
use crate::migration::MigrateEntry;
use crate::network::GetArgs;
use crate::network::GetReply;
use crate::network::MigrateShardsArgs;
use crate::network::MigrateShardsReply;
use crate::network::PeerNetwork;
use crate::network::PutAppendArgs;
use crate::network::PutAppendReply;
use crate::op::ClientId;
use crate::op::Op;
use crate::op::OpId;
use crate::op::PutAppendKind;
use crate::op::RequestId;
use crate::runtime_config::RuntimeConfig;
use crate::shard_config::shard_of;
use crate::shard_config::Config;
use crate::shard_config::GroupId;
use crate::state::PersistedState;

/// The outcome the applier delivers back to a waiting front-end handler through the rendezvous
/// channel (§3 "Lifecycles", §4.2 step 5).
pub type FrontEndReply = (Err, String);

/// A registered, not-yet-applied proposal (§3 "Pending command table").
pub(crate) struct CommandEntry {
    /// The `(client_id, op_id)` the entry at this index is expected to carry. If the applier
    /// observes a different one, leadership changed mid-flight and a foreign entry took this
    /// index (§4.1).
    pub expected: Option<RequestId>,
    pub tx: oneshot::Sender<FrontEndReply>,
}

pub(crate) struct ReplicaState {
    pub persisted: PersistedState,
    pub config: Config,
    pub applied_command_index: u64,
    pub last_snapshot_trigger: u64,
    pub command_tbl: HashMap<u64, CommandEntry>,
    pub migrate_tbl: HashMap<GroupId, Arc<MigrateEntry>>,
}

/// One running replica: the shared state plus handles to the external collaborators it was built
/// with.
pub struct Replica {
    pub(crate) my_gid: GroupId,
    pub(crate) runtime: RuntimeConfig,
    pub(crate) consensus: Arc<dyn ConsensusHandle>,
    pub(crate) controller: Arc<dyn ShardCtrlClient>,
    pub(crate) network: Arc<dyn PeerNetwork>,
    pub(crate) state: Mutex<ReplicaState>,
    pub(crate) snapshot_trigger: Notify,
    pub(crate) fetch_trigger: Notify,
    /// Shared quit signal (§5): closed by [`Replica::kill`], observed by every long-lived
    /// background loop (fetcher, snapshotter, per-peer migration senders) so none of them outlive
    /// the replica.
    pub(crate) quit_tx: watch::Sender<bool>,
    pub(crate) quit_rx: watch::Receiver<bool>,
}

impl Replica {
    /// Construct a replica. Does not spawn any background tasks; call [`Replica::spawn`] once the
    /// caller has wired the apply stream.
    pub fn new(
        my_gid: GroupId,
        client_id: ClientId,
        runtime: RuntimeConfig,
        consensus: Arc<dyn ConsensusHandle>,
        controller: Arc<dyn ShardCtrlClient>,
        network: Arc<dyn PeerNetwork>,
    ) -> Arc<Self> {
        let (quit_tx, quit_rx) = watch::channel(false);
        Arc::new(Self {
            my_gid,
            runtime,
            consensus,
            controller,
            network,
            state: Mutex::new(ReplicaState {
                persisted: PersistedState::new(client_id),
                config: Config::new_empty(),
                applied_command_index: 0,
                last_snapshot_trigger: 0,
                command_tbl: HashMap::new(),
                migrate_tbl: HashMap::new(),
            }),
            snapshot_trigger: Notify::new(),
            fetch_trigger: Notify::new(),
            quit_tx,
            quit_rx,
        })
    }

    /// Spawn the applier, config fetcher and snapshotter tasks. `apply_rx` is the consensus
    /// engine's apply stream (§6); ownership moves to the applier task.
    pub fn spawn(self: &Arc<Self>, apply_rx: mpsc::Receiver<ApplyMsg>) {
        let applier_replica = self.clone();
        tokio::spawn(
            async move { crate::applier::run(applier_replica, apply_rx).await }
                .instrument(tracing::debug_span!("applier")),
        );

        let fetcher_replica = self.clone();
        let fetcher_quit = self.quit_rx.clone();
        tokio::spawn(
            async move { crate::fetcher::run(fetcher_replica, fetcher_quit).await }
                .instrument(tracing::debug_span!("fetcher")),
        );

        let snapshotter_replica = self.clone();
        let snapshotter_quit = self.quit_rx.clone();
        tokio::spawn(
            async move { crate::snapshot::run(snapshotter_replica, snapshotter_quit).await }
                .instrument(tracing::debug_span!("snapshotter")),
        );
    }

    async fn freshness_gate(
        &self,
        config_num: u64,
        key_for_shard_check: Option<&str>,
    ) -> Result<(), Err> {
        let (_, is_leader) = self.consensus.get_state().await;
        if !is_leader {
            return Err(Err::WrongLeader);
        }

        let state = self.state.lock().await;

        if let Some(key) = key_for_shard_check {
            if state.config.is_pristine() || state.config.owner_of(shard_of(key)) != self.my_gid {
                return Err(Err::WrongGroup);
            }
        }

        if state.config.num < config_num {
            drop(state);
            self.fetch_trigger.notify_one();
            return Err(Err::UnknownConfig);
        }
        if state.config.num > config_num {
            return Err(Err::OutdatedConfig);
        }
        Ok(())
    }

    /// Propose `op` and wait for the applier to deliver its outcome, or for a term change to
    /// invalidate the proposal (§4.1 steps 4-7).
    async fn propose_and_await(&self, op: Op) -> FrontEndReply {
        let expected = op.request_id();

        let outcome = match self.consensus.start(op).await {
            Ok(o) => o,
            Err(crate::error::ProposeError::NotLeader) => return (Err::WrongLeader, String::new()),
            Err(crate::error::ProposeError::ShuttingDown) => return (Err::Shutdown, String::new()),
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.command_tbl.insert(outcome.index, CommandEntry { expected, tx });
        }

        let term_poll = async {
            let mut ticker = tokio::time::interval(self.runtime.poll_interval);
            loop {
                ticker.tick().await;
                let (term, is_leader) = self.consensus.get_state().await;
                if !is_leader || term != outcome.term {
                    return;
                }
            }
        };

        tokio::select! {
            res = rx => res.unwrap_or((Err::Shutdown, String::new())),
            _ = term_poll => {
                // Leadership may have already delivered a reply concurrently with the term
                // changing; don't strand the applier waiting on a closed receiver forever, but
                // also don't race it — just remove our own registration if still present.
                let mut state = self.state.lock().await;
                state.command_tbl.remove(&outcome.index);
                (Err::WrongLeader, String::new())
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get(&self, args: GetArgs) -> GetReply {
        if let Err(err) = self.freshness_gate(args.config_num, Some(&args.key)).await {
            return GetReply { err, value: String::new() };
        }

        let op = Op::Get {
            id: RequestId { client_id: args.client_id, op_id: args.op_id },
            key: args.key,
        };
        let (err, value) = self.propose_and_await(op).await;
        GetReply { err, value }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn put_append(&self, args: PutAppendArgs) -> PutAppendReply {
        if let Err(err) = self.freshness_gate(args.config_num, Some(&args.key)).await {
            return PutAppendReply { err };
        }

        let op = Op::PutAppend {
            id: RequestId { client_id: args.client_id, op_id: args.op_id },
            key: args.key,
            value: args.value,
            kind: args.kind,
        };
        let (err, _) = self.propose_and_await(op).await;
        PutAppendReply { err }
    }

    #[tracing::instrument(level = "debug", skip(self, args))]
    pub async fn migrate_shards(&self, args: MigrateShardsArgs) -> MigrateShardsReply {
        // The shard-ownership precheck is skipped for migrations; the gate is strictly on
        // config_num equality (§4.1).
        if let Err(err) = self.freshness_gate(args.config_num, None).await {
            return MigrateShardsReply { err };
        }

        let op = Op::Migrate {
            id: RequestId { client_id: args.client_id, op_id: args.op_id },
            config_num: args.config_num,
            shards: args.shards,
            data: args.data,
        };
        let (err, _) = self.propose_and_await(op).await;
        MigrateShardsReply { err }
    }

    /// Tear the replica down: kill the consensus engine (which closes the apply stream and
    /// unblocks the applier), close the shared quit signal (which unblocks the fetcher,
    /// snapshotter and every per-peer migration sender), and drain any pending front-end
    /// rendezvous with `Shutdown` (§5 "Cancellation").
    pub async fn kill(&self) {
        self.consensus.kill().await;
        let _ = self.quit_tx.send(true);
        let mut state = self.state.lock().await;
        for (_, entry) in state.command_tbl.drain() {
            let _ = entry.tx.send((Err::Shutdown, String::new()));
        }
    }
}

/// Convenience for building a `PutAppend` args payload from the classic `(Put|Append)` split.
pub fn put_append_args(
    key: String,
    value: String,
    kind: PutAppendKind,
    config_num: u64,
    client_id: ClientId,
    op_id: OpId,
) -> PutAppendArgs {
    PutAppendArgs { key, value, kind, config_num, client_id, op_id }
}

/// Used by `shardkv-testkit` and integration tests to wait past a front-end call's retry policy
/// without busy-looping.
pub async fn backoff(runtime: &RuntimeConfig) {
    tokio::time::sleep(Duration::from_millis(runtime.retry_pause.as_millis() as u64)).await;
}
