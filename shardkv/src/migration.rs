//! Shard hand-off: computing what to send on reconfiguration (§4.3) and the persistent per-peer
//! sender task that ships it (§4.4).
//!
//! Grounded on `async_raft::replication::ReplicationStream`/`ReplicationCore`: a public handle
//! (`MigrateEntry`) wrapping a channel into a long-lived task, one per target, that owns its own
//! retry and leader-discovery loop and is never torn down except at replica death.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tracing::Instrument;

use crate::network::MigrateShardsArgs;
use crate::server::Replica;
use crate::shard_config::shard_of;
use crate::shard_config::Config;
use crate::shard_config::GroupId;
use crate::state::PersistedState;

/// One group's worth of outgoing shard data for a single config transition (§3 "Migrate-out queue
/// state").
#[derive(Clone, Debug)]
pub struct MigrationBatch {
    pub config_num: u64,
    pub shards: Vec<usize>,
    pub merged_data: BTreeMap<String, String>,
}

/// A single-slot mailbox where pushing a new value replaces whatever was waiting, never blocking
/// the pusher. This gives the outbox its "capacity 1, latest-wins" semantics (§4.3) without the
/// producer (the applier) ever stalling on a full channel.
struct LatestSlot<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> LatestSlot<T> {
    fn new() -> Self {
        Self { slot: Mutex::new(None), notify: Notify::new() }
    }

    async fn push(&self, value: T) {
        *self.slot.lock().await = Some(value);
        self.notify.notify_one();
    }

    /// Wait for and take the latest pending value.
    async fn recv(&self) -> T {
        loop {
            if let Some(v) = self.slot.lock().await.take() {
                return v;
            }
            self.notify.notified().await;
        }
    }
}

/// The handle to one target group's migration sender: a persistent task plus the mailbox feeding
/// it (§3 "Lifecycles" — lives until replica death).
pub(crate) struct MigrateEntry {
    config_num: std::sync::atomic::AtomicU64,
    leader_hint: AtomicUsize,
    slot: LatestSlot<MigrationBatch>,
}

impl MigrateEntry {
    fn new(initial_config_num: u64) -> Self {
        Self {
            config_num: std::sync::atomic::AtomicU64::new(initial_config_num),
            leader_hint: AtomicUsize::new(0),
            slot: LatestSlot::new(),
        }
    }

    pub(crate) fn config_num(&self) -> u64 {
        self.config_num.load(Ordering::SeqCst)
    }

    fn bump(&self, num: u64) {
        self.config_num.store(num, Ordering::SeqCst);
    }
}

/// Diff `old` against `new` to find shards this group just gave up, grouping the handed-off data
/// by new owner (§4.3).
///
/// Deliberately does not remove anything from `persisted.tbl` — the purge (REDESIGN FLAGS) is the
/// applier's job, strictly after this copy, when the `ConfigUpdate` itself is applied.
pub(crate) fn compute_handoffs(
    old: &Config,
    new: &Config,
    persisted: &PersistedState,
    my_gid: GroupId,
) -> BTreeMap<GroupId, MigrationBatch> {
    let mut out: BTreeMap<GroupId, MigrationBatch> = BTreeMap::new();

    for s in 0..crate::shard_config::N_SHARDS {
        if old.owner_of(s) == my_gid && new.owner_of(s) != my_gid {
            let target = new.owner_of(s);
            let batch = out.entry(target).or_insert_with(|| MigrationBatch {
                config_num: new.num,
                shards: Vec::new(),
                merged_data: BTreeMap::new(),
            });
            batch.shards.push(s);
            for (k, v) in persisted.tbl.iter() {
                if shard_of(k) == s {
                    batch.merged_data.insert(k.clone(), v.clone());
                }
            }
        }
    }

    out
}

/// Apply the hand-off plan computed by [`compute_handoffs`]: create/bump/drop the target's
/// `MigrateEntry` and push the batch onto its outbox (§4.3's per-`(g, out)` trigger). Spawns the
/// per-peer sender the first time a group is seen.
pub(crate) async fn dispatch_handoffs(replica: &Arc<Replica>, handoffs: BTreeMap<GroupId, MigrationBatch>) {
    for (target_gid, batch) in handoffs {
        let entry = {
            let mut state = replica.state.lock().await;
            match state.migrate_tbl.get(&target_gid) {
                Some(existing) => {
                    if batch.config_num > existing.config_num() {
                        existing.bump(batch.config_num);
                    } else if batch.config_num < existing.config_num() {
                        tracing::debug!(target_gid, "dropping stale hand-off trigger");
                        continue;
                    }
                    existing.clone()
                }
                None => {
                    let entry = Arc::new(MigrateEntry::new(batch.config_num));
                    state.migrate_tbl.insert(target_gid, entry.clone());
                    let sender_replica = replica.clone();
                    let sender_entry = entry.clone();
                    let sender_quit = replica.quit_rx.clone();
                    tokio::spawn(
                        async move { run_sender(sender_replica, target_gid, sender_entry, sender_quit).await }
                            .instrument(tracing::debug_span!("migrate-sender", target = target_gid)),
                    );
                    entry
                }
            }
        };
        entry.slot.push(batch).await;
    }
}

/// Sleep for `dur`, but return early (with `true`) if the quit signal fires first, so a sender
/// stuck retrying never outlives [`Replica::kill`].
async fn sleep_or_quit(dur: std::time::Duration, quit: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => false,
        _ = quit.changed() => true,
    }
}

/// The persistent per-peer sender task (§4.4): one per target group, for the replica's lifetime.
async fn run_sender(replica: Arc<Replica>, target_gid: GroupId, entry: Arc<MigrateEntry>, mut quit: watch::Receiver<bool>) {
    loop {
        let batch = tokio::select! {
            batch = entry.slot.recv() => batch,
            _ = quit.changed() => {
                tracing::debug!(target_gid, "migration sender stopping, quit signal received");
                return;
            }
        };

        if batch.config_num != entry.config_num() {
            tracing::debug!(target_gid, batch.config_num, "stale batch superseded before send, dropping");
            continue;
        }

        let (client_id, op_id) = {
            let mut state = replica.state.lock().await;
            let id = state.persisted.client_id;
            let op = state.persisted.op_id;
            state.persisted.op_id += 1;
            (id, op)
        };

        let args = MigrateShardsArgs {
            config_num: batch.config_num,
            shards: batch.shards.clone(),
            data: batch.merged_data.clone(),
            client_id,
            op_id,
        };

        'delivery: loop {
            let servers = {
                let state = replica.state.lock().await;
                state.config.groups.get(&target_gid).cloned().unwrap_or_default()
            };
            if servers.is_empty() {
                tracing::warn!(target_gid, "no known servers for migration target, retrying later");
                if sleep_or_quit(replica.runtime.retry_pause, &mut quit).await {
                    return;
                }
                continue 'delivery;
            }

            let start = entry.leader_hint.load(Ordering::SeqCst) % servers.len();
            let mut delivered = false;

            for offset in 0..servers.len() {
                let (_, still_leader) = replica.consensus.get_state().await;
                if !still_leader {
                    tracing::debug!(target_gid, "lost leadership, abandoning this delivery attempt");
                    return;
                }
                {
                    let state = replica.state.lock().await;
                    if state.config.num != batch.config_num {
                        tracing::debug!(target_gid, "local config diverged from batch, aborting");
                        return;
                    }
                }

                let idx = (start + offset) % servers.len();
                let server = &servers[idx];

                match replica.network.migrate_shards(server, args.clone()).await {
                    Ok(reply) => match reply.err {
                        crate::error::Err::Ok => {
                            entry.leader_hint.store(idx, Ordering::SeqCst);
                            delivered = true;
                            break;
                        }
                        crate::error::Err::UnknownConfig => {
                            if sleep_or_quit(replica.runtime.retry_pause, &mut quit).await {
                                return;
                            }
                        }
                        crate::error::Err::OutdatedConfig => {
                            replica.fetch_trigger.notify_one();
                            if sleep_or_quit(replica.runtime.retry_pause, &mut quit).await {
                                return;
                            }
                        }
                        crate::error::Err::WrongLeader | crate::error::Err::Shutdown | crate::error::Err::WrongGroup => {
                            continue;
                        }
                    },
                    Err(_) => continue,
                }
            }

            if delivered {
                break 'delivery;
            }
            if sleep_or_quit(replica.runtime.retry_pause, &mut quit).await {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard_config::N_SHARDS;

    #[test]
    fn computes_handoffs_for_changed_shards() {
        let mut old = Config::new_empty();
        old.num = 1;
        old.shards = [1; N_SHARDS];

        let mut new = old.clone();
        new.num = 2;
        new.shards[0] = 2;

        let mut persisted = PersistedState::new(1);
        persisted.tbl.insert("k".into(), "v".into());
        let shard_of_k = shard_of("k");
        new.shards[shard_of_k] = 2;
        old.shards[shard_of_k] = 1;

        let handoffs = compute_handoffs(&old, &new, &persisted, 1);
        let batch = handoffs.get(&2).expect("expected a handoff to group 2");
        assert_eq!(batch.config_num, 2);
        assert!(batch.shards.contains(&shard_of_k));
        assert_eq!(batch.merged_data.get("k"), Some(&"v".to_string()));
    }

    #[test]
    fn no_handoff_when_ownership_unchanged() {
        let mut cfg = Config::new_empty();
        cfg.num = 1;
        cfg.shards = [1; N_SHARDS];
        let persisted = PersistedState::new(1);

        let handoffs = compute_handoffs(&cfg, &cfg, &persisted, 1);
        assert!(handoffs.is_empty());
    }
}
