//! The external shard controller's interface, as consumed by the config fetcher (§4.5, §6).

use async_trait::async_trait;

use crate::error::InternalResult;
use crate::shard_config::Config;

/// Sentinel passed to [`ShardCtrlClient::query`] meaning "the latest known config".
pub const LATEST: i64 = -1;

/// The trait boundary this core consumes from the external shard controller.
///
/// Analogous in spirit to `RaftNetwork`: a thin async trait the core depends on abstractly, with
/// a real implementation doing RPC to the controller service and `shardkv-testkit` providing an
/// in-memory one for tests.
#[async_trait]
pub trait ShardCtrlClient: Send + Sync + 'static {
    /// Fetch the config numbered `num`, or the latest config if `num == LATEST`.
    async fn query(&self, num: i64) -> InternalResult<Config>;
}
