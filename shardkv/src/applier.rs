//! The applier (§4.2): the single consumer of the consensus engine's apply stream, and the sole
//! mutator of `tbl`, `client_tbl`, `config` and `applied_command_index` (§3 invariants).
//!
//! Grounded on `async_raft::core::RaftCore`'s own main loop, which is likewise the one place
//! `async-raft` lets itself mutate its log-derived state; the difference here is that our
//! "apply stream" is handed to us as an owned channel rather than driven by an internal state
//! machine, matching §6's description of the consensus engine's interface.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::consensus::ApplyMsg;
use crate::error::Err;
use crate::migration;
use crate::op::Op;
use crate::op::PutAppendKind;
use crate::op::RequestId;
use crate::server::Replica;
use crate::server::ReplicaState;
use crate::shard_config::shard_of;
use crate::shard_config::Config;
use crate::shard_config::GroupId;
use crate::state::CachedReply;
use crate::state::PersistedState;

pub(crate) async fn run(replica: Arc<Replica>, mut apply_rx: mpsc::Receiver<ApplyMsg>) {
    while let Some(msg) = apply_rx.recv().await {
        match msg {
            ApplyMsg::Snapshot { snapshot, snapshot_index, .. } => {
                install_snapshot(&replica, snapshot, snapshot_index).await
            }
            ApplyMsg::Command { command, command_index } => apply_command(&replica, command, command_index).await,
        }
    }

    tracing::info!("apply stream closed, draining pending commands");
    let mut state = replica.state.lock().await;
    for (_, entry) in state.command_tbl.drain() {
        let _ = entry.tx.send((Err::Shutdown, String::new()));
    }
}

async fn install_snapshot(replica: &Arc<Replica>, bytes: Vec<u8>, index: u64) {
    let decoded = match PersistedState::decode(&bytes) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to decode installed snapshot, ignoring");
            return;
        }
    };

    let mut state = replica.state.lock().await;
    state.persisted = decoded;
    state.applied_command_index = index;
    for (_, entry) in state.command_tbl.drain() {
        let _ = entry.tx.send((Err::WrongLeader, String::new()));
    }
}

/// What, if anything, a just-applied `ConfigUpdate` requires the migration engine to do once the
/// state lock is released.
struct PendingHandoffs {
    old: Config,
    new: Config,
    persisted_snapshot: PersistedState,
}

async fn apply_command(replica: &Arc<Replica>, op: Op, index: u64) {
    let mut snapshot_signal = false;
    let mut pending_handoffs: Option<PendingHandoffs> = None;

    tracing::trace!(index, op = %op.summary(), "applying");

    {
        let mut state = replica.state.lock().await;
        state.applied_command_index = index;

        if index.saturating_sub(state.last_snapshot_trigger) > replica.runtime.snapshot_trigger_interval {
            state.last_snapshot_trigger = index;
            snapshot_signal = true;
        }

        let delivery: Option<(RequestId, Err, String)> = match op {
            Op::ConfigUpdate { config: new } => {
                if new.num > state.config.num {
                    let old = state.config.clone();
                    let persisted_snapshot = state.persisted.clone();
                    state.config = new.clone();
                    state.persisted.purge_shards_not_owned(&state.config, replica.my_gid);
                    pending_handoffs = Some(PendingHandoffs { old, new, persisted_snapshot });
                }
                None
            }
            other => {
                let id = other.request_id().expect("non-ConfigUpdate ops always carry a request id");
                let (err, value) = apply_client_op(&mut state, &other, id, replica.my_gid);
                Some((id, err, value))
            }
        };

        if let Some(entry) = state.command_tbl.remove(&index) {
            let reply = match &delivery {
                Some((got, err, value)) if entry.expected == Some(*got) => (*err, value.clone()),
                _ => (Err::WrongLeader, String::new()),
            };
            let _ = entry.tx.send(reply);
        }
    }

    if snapshot_signal {
        replica.snapshot_trigger.notify_one();
    }

    if let Some(pending) = pending_handoffs {
        let (_, is_leader) = replica.consensus.get_state().await;
        if is_leader && pending.old.num > 0 {
            let batches =
                migration::compute_handoffs(&pending.old, &pending.new, &pending.persisted_snapshot, replica.my_gid);
            migration::dispatch_handoffs(replica, batches).await;
        }
    }
}

fn apply_client_op(state: &mut ReplicaState, op: &Op, id: RequestId, my_gid: GroupId) -> (Err, String) {
    if let Some(cached) = state.persisted.client_tbl.get(&id.client_id) {
        if cached.op_id >= id.op_id {
            return (cached.err, cached.value.clone());
        }
    }

    // The front-end's shard-ownership gate is advisory (it can race a concurrently-applying
    // ConfigUpdate); this is the authoritative check, made under the same lock that the
    // ConfigUpdate/Migrate purge runs under (§3 invariants, "at apply time").
    let owns_key = |key: &str| state.config.owner_of(shard_of(key)) == my_gid;

    let (err, value) = match op {
        Op::Get { key, .. } if !owns_key(key) => (Err::WrongGroup, String::new()),
        Op::PutAppend { key, .. } if !owns_key(key) => (Err::WrongGroup, String::new()),
        Op::Get { key, .. } => {
            let value = state.persisted.tbl.get(key).cloned().unwrap_or_default();
            (Err::Ok, value)
        }
        Op::PutAppend { key, value, kind, .. } => {
            match kind {
                PutAppendKind::Put => {
                    state.persisted.tbl.insert(key.clone(), value.clone());
                }
                PutAppendKind::Append => {
                    state.persisted.tbl.entry(key.clone()).or_default().push_str(value);
                }
            }
            (Err::Ok, String::new())
        }
        Op::Migrate { config_num, data, .. } => {
            if *config_num < state.config.num {
                (Err::OutdatedConfig, String::new())
            } else {
                for (k, v) in data {
                    state.persisted.tbl.insert(k.clone(), v.clone());
                }
                (Err::Ok, String::new())
            }
        }
        Op::ConfigUpdate { .. } => unreachable!("ConfigUpdate is handled by the caller before reaching here"),
    };

    state.persisted.client_tbl.insert(id.client_id, CachedReply { err, value: value.clone(), op_id: id.op_id });
    (err, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn fresh_state() -> ReplicaState {
        ReplicaState {
            persisted: PersistedState::new(1),
            config: Config::new_empty(),
            applied_command_index: 0,
            last_snapshot_trigger: 0,
            command_tbl: HashMap::new(),
            migrate_tbl: HashMap::new(),
        }
    }

    #[test]
    fn put_then_append_concatenates() {
        let mut state = fresh_state();
        let id = RequestId { client_id: 1, op_id: 1 };
        let put = Op::PutAppend { id, key: "x".into(), value: "1".into(), kind: PutAppendKind::Put };
        apply_client_op(&mut state, &put, id, 0);

        let id2 = RequestId { client_id: 1, op_id: 2 };
        let append = Op::PutAppend { id: id2, key: "x".into(), value: "2".into(), kind: PutAppendKind::Append };
        apply_client_op(&mut state, &append, id2, 0);

        assert_eq!(state.persisted.tbl.get("x"), Some(&"12".to_string()));
    }

    #[test]
    fn stale_op_id_is_served_from_cache_not_reapplied() {
        let mut state = fresh_state();
        let id = RequestId { client_id: 1, op_id: 5 };
        let append = Op::PutAppend { id, key: "x".into(), value: "a".into(), kind: PutAppendKind::Append };
        apply_client_op(&mut state, &append, id, 0);
        apply_client_op(&mut state, &append, id, 0); // retried with the same op_id
        assert_eq!(state.persisted.tbl.get("x"), Some(&"a".to_string()));
    }

    #[test]
    fn migrate_rejects_outdated_config_but_still_caches() {
        let mut state = fresh_state();
        state.config.num = 5;
        let id = RequestId { client_id: 2, op_id: 1 };
        let mut data = HashMap::new();
        data.insert("k".to_string(), "v".to_string());
        let op = Op::Migrate { id, config_num: 3, shards: vec![0], data };
        let (err, _) = apply_client_op(&mut state, &op, id, 0);
        assert_eq!(err, Err::OutdatedConfig);
        assert!(state.persisted.tbl.get("k").is_none());
        assert!(state.persisted.client_tbl.contains_key(&2));
    }

    #[test]
    fn put_for_unowned_shard_is_rejected_at_apply_time_without_mutating_tbl() {
        let mut state = fresh_state();
        state.config.num = 1;
        state.config.shards[shard_of("x")] = 2; // owned by group 2, not my_gid (1) below

        let id = RequestId { client_id: 1, op_id: 1 };
        let put = Op::PutAppend { id, key: "x".into(), value: "1".into(), kind: PutAppendKind::Put };
        let (err, _) = apply_client_op(&mut state, &put, id, 1);

        assert_eq!(err, Err::WrongGroup);
        assert!(state.persisted.tbl.get("x").is_none());
    }

    #[test]
    fn get_for_unowned_shard_is_rejected_at_apply_time() {
        let mut state = fresh_state();
        state.config.num = 1;
        state.config.shards[shard_of("x")] = 2;
        state.persisted.tbl.insert("x".into(), "leaked".into());

        let id = RequestId { client_id: 1, op_id: 1 };
        let get = Op::Get { id, key: "x".into() };
        let (err, value) = apply_client_op(&mut state, &get, id, 1);

        assert_eq!(err, Err::WrongGroup);
        assert!(value.is_empty());
    }
}
