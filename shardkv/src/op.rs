//! The consensus log entry payload (§3 `Op`, §9 "Dynamic op payloads").
//!
//! Modeled as a tagged union, the way `async_raft::raft::EntryPayload<D>` wraps the
//! application-specific entry in a closed enum rather than a dynamically typed container. Every
//! variant must round-trip through the persisted-state codec unchanged.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::shard_config::Config;

pub type ClientId = i64;
pub type OpId = i64;

/// Identifies a single client-issued (or migration-issued) request, for at-most-once dedup.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RequestId {
    pub client_id: ClientId,
    pub op_id: OpId,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PutAppendKind {
    Put,
    Append,
}

/// A single committed log entry's business payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Op {
    Get {
        id: RequestId,
        key: String,
    },
    PutAppend {
        id: RequestId,
        key: String,
        value: String,
        kind: PutAppendKind,
    },
    Migrate {
        id: RequestId,
        config_num: u64,
        shards: Vec<usize>,
        data: BTreeMap<String, String>,
    },
    /// Internal entry; the applier is the only path by which `config` changes (§3 invariants).
    ConfigUpdate { config: Config },
}

impl Op {
    /// The `(client_id, op_id)` this entry is keyed on for at-most-once dedup, or `None` for
    /// internal entries that never touch the client result cache.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Op::Get { id, .. } => Some(*id),
            Op::PutAppend { id, .. } => Some(*id),
            Op::Migrate { id, .. } => Some(*id),
            Op::ConfigUpdate { .. } => None,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Op::Get { key, .. } => format!("get({key})"),
            Op::PutAppend { key, kind, .. } => format!("{kind:?}({key})"),
            Op::Migrate { config_num, shards, .. } => format!("migrate(cfg={config_num}, shards={shards:?})"),
            Op::ConfigUpdate { config } => format!("config-update(num={})", config.num),
        }
    }
}
