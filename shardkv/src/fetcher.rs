//! The config fetcher (§4.5): polls the shard controller and, on the leader, proposes adoption
//! of newer configs through consensus. The applier is the only path by which `config` actually
//! changes (§3 invariants) — this task never mutates `state.config` itself.

use std::sync::Arc;

use tokio::sync::watch;

use crate::controller::LATEST;
use crate::op::Op;
use crate::server::Replica;

pub(crate) async fn run(replica: Arc<Replica>, mut quit: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(replica.runtime.poll_interval) => {}
            _ = replica.fetch_trigger.notified() => {}
            _ = quit.changed() => {
                tracing::debug!("fetcher stopping, quit signal received");
                return;
            }
        }

        let (_, is_leader) = replica.consensus.get_state().await;
        if !is_leader {
            continue;
        }

        let local_num = { replica.state.lock().await.config.num };

        let queried = match replica.controller.query(LATEST).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "config fetch failed, will retry");
                continue;
            }
        };

        if queried.num > local_num {
            tracing::debug!(from = local_num, to = queried.num, "proposing newer config");
            // The fetcher does not wait for this to commit or care about the outcome: if it is
            // dropped because leadership changed mid-flight, the new leader's own fetcher will
            // observe the same controller state and retry.
            let _ = replica.consensus.start(Op::ConfigUpdate { config: queried }).await;
        }
    }
}
