//! The RPC surface (§6) and the transport boundary this core depends on to reach peer replicas.
//!
//! `PeerNetwork` plays the role `async_raft::RaftNetwork` plays for raft's own RPCs: a thin async
//! trait parameterized over a logical server name, with the actual wire transport left to the
//! caller. A real deployment backs it with whatever RPC framework is in use; `shardkv-testkit`
//! provides an in-memory router for tests.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Err;
use crate::error::InternalResult;
use crate::op::ClientId;
use crate::op::OpId;
use crate::op::PutAppendKind;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetArgs {
    pub key: String,
    pub config_num: u64,
    pub client_id: ClientId,
    pub op_id: OpId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetReply {
    pub err: Err,
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PutAppendArgs {
    pub key: String,
    pub value: String,
    pub kind: PutAppendKind,
    pub config_num: u64,
    pub client_id: ClientId,
    pub op_id: OpId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PutAppendReply {
    pub err: Err,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrateShardsArgs {
    pub config_num: u64,
    pub shards: Vec<usize>,
    pub data: BTreeMap<String, String>,
    pub client_id: ClientId,
    pub op_id: OpId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrateShardsReply {
    pub err: Err,
}

/// A callable endpoint for one named peer server, handed out by a [`PeerNetwork`] factory.
#[async_trait]
pub trait PeerNetwork: Send + Sync + 'static {
    async fn get(&self, server: &str, args: GetArgs) -> InternalResult<GetReply>;
    async fn put_append(&self, server: &str, args: PutAppendArgs) -> InternalResult<PutAppendReply>;
    async fn migrate_shards(&self, server: &str, args: MigrateShardsArgs) -> InternalResult<MigrateShardsReply>;
}
