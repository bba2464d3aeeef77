//! The in-memory KV table, client result cache, and the persisted-state codec (§3, §6).

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Err;
use crate::error::InternalResult;
use crate::op::ClientId;
use crate::op::OpId;

/// The cached outcome of the last operation a client issued, for at-most-once dedup (§3, §4.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedReply {
    pub err: Err,
    pub value: String,
    pub op_id: OpId,
}

/// Everything a snapshot must describe byte-for-byte identically regardless of whether it was
/// produced by taking a snapshot at index `i` or by installing one (§8 "Snapshot equivalence").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub tbl: HashMap<String, String>,
    pub client_tbl: HashMap<ClientId, CachedReply>,
    /// This replica's own identity when it acts as a migration sender (§4.4): the `client_id` it
    /// stamps on outgoing `Migrate` ops.
    pub client_id: ClientId,
    /// Next `op_id` this replica will stamp on an outgoing migration, monotonic across the
    /// replica's lifetime.
    pub op_id: OpId,
}

impl PersistedState {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            tbl: HashMap::new(),
            client_tbl: HashMap::new(),
            client_id,
            op_id: 0,
        }
    }

    pub fn encode(&self) -> InternalResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> InternalResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Remove every key whose shard is no longer owned by `my_gid` under `config`. Invoked by the
    /// applier strictly after the migration builder has copied outgoing shards into their
    /// outboxes (§4.3, REDESIGN FLAGS).
    pub fn purge_shards_not_owned(&mut self, config: &crate::shard_config::Config, my_gid: u64) {
        self.tbl.retain(|k, _| config.owner_of(crate::shard_config::shard_of(k)) == my_gid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bincode() {
        let mut st = PersistedState::new(7);
        st.tbl.insert("a".into(), "1".into());
        st.client_tbl.insert(1, CachedReply { err: Err::Ok, value: "1".into(), op_id: 3 });
        st.op_id = 5;

        let bytes = st.encode().unwrap();
        let back = PersistedState::decode(&bytes).unwrap();
        assert_eq!(back.tbl.get("a"), Some(&"1".to_string()));
        assert_eq!(back.client_id, 7);
        assert_eq!(back.op_id, 5);
    }
}
