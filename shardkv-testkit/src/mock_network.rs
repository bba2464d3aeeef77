//! An in-memory router standing in for the RPC transport (§6), playing the role
//! `tests/fixtures::RaftRouter` plays for `async_raft::RaftNetwork` in `async-raft`'s own suite:
//! a name-keyed table of live replicas that delivers calls by direct method invocation instead of
//! going over a socket.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use shardkv::network::GetArgs;
use shardkv::network::GetReply;
use shardkv::network::MigrateShardsArgs;
use shardkv::network::MigrateShardsReply;
use shardkv::network::PeerNetwork;
use shardkv::network::PutAppendArgs;
use shardkv::network::PutAppendReply;
use shardkv::Replica;

#[derive(Default)]
pub struct MockNetwork {
    servers: RwLock<HashMap<String, Arc<Replica>>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, name: impl Into<String>, replica: Arc<Replica>) {
        self.servers.write().await.insert(name.into(), replica);
    }

    async fn lookup(&self, server: &str) -> anyhow::Result<Arc<Replica>> {
        self.servers.read().await.get(server).cloned().ok_or_else(|| anyhow::anyhow!("unknown server: {server}"))
    }
}

#[async_trait]
impl PeerNetwork for MockNetwork {
    async fn get(&self, server: &str, args: GetArgs) -> anyhow::Result<GetReply> {
        Ok(self.lookup(server).await?.get(args).await)
    }

    async fn put_append(&self, server: &str, args: PutAppendArgs) -> anyhow::Result<PutAppendReply> {
        Ok(self.lookup(server).await?.put_append(args).await)
    }

    async fn migrate_shards(&self, server: &str, args: MigrateShardsArgs) -> anyhow::Result<MigrateShardsReply> {
        Ok(self.lookup(server).await?.migrate_shards(args).await)
    }
}
