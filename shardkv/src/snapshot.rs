//! The snapshotter (§4.6): monitors log size and emits periodic snapshots of persisted state so
//! the consensus engine can compact its log.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::server::Replica;

pub(crate) async fn run(replica: Arc<Replica>, mut quit: watch::Receiver<bool>) {
    if !replica.runtime.snapshotting_enabled() {
        tracing::debug!("snapshotting disabled (max_raft_state_bytes < 0)");
        return;
    }

    loop {
        let log_bytes = replica.consensus.log_size_bytes().await as f64;
        let ratio = (log_bytes / replica.runtime.max_raft_state_bytes).clamp(0.0, 1.0);

        if ratio > replica.runtime.snapshot_threshold_ratio {
            take_snapshot(&replica).await;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                _ = replica.snapshot_trigger.notified() => {}
                _ = quit.changed() => {
                    tracing::debug!("snapshotter stopping, quit signal received");
                    return;
                }
            }
            continue;
        }

        let sleep_for = Duration::from_secs_f64((1.0 - ratio) * 0.1);
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = replica.snapshot_trigger.notified() => {}
            _ = quit.changed() => {
                tracing::debug!("snapshotter stopping, quit signal received");
                return;
            }
        }
    }
}

async fn take_snapshot(replica: &Arc<Replica>) {
    let (index, bytes) = {
        let state = replica.state.lock().await;
        match state.persisted.encode() {
            Ok(bytes) => (state.applied_command_index, bytes),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode persisted state for snapshot");
                return;
            }
        }
    };

    if let Err(e) = replica.consensus.snapshot(index, bytes).await {
        tracing::warn!(error = %e, index, "snapshot call to consensus engine failed");
    }
}
