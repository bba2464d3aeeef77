//! An in-memory stand-in for the shard controller client (§6).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use shardkv::controller::ShardCtrlClient;
use shardkv::controller::LATEST;
use shardkv::ShardConfig;

/// Holds a linear history of configs, indexed by `num`. `configs[0]` is always the pristine
/// (`num == 0`) config.
pub struct MockShardController {
    configs: Mutex<Vec<ShardConfig>>,
}

impl MockShardController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { configs: Mutex::new(vec![ShardConfig::new_empty()]) })
    }

    /// Append a new config. Callers are responsible for giving it `num == previous_len`.
    pub async fn push_config(&self, config: ShardConfig) {
        self.configs.lock().await.push(config);
    }

    pub async fn latest_num(&self) -> u64 {
        self.configs.lock().await.len() as u64 - 1
    }
}

#[async_trait]
impl ShardCtrlClient for MockShardController {
    async fn query(&self, num: i64) -> anyhow::Result<ShardConfig> {
        let configs = self.configs.lock().await;
        if num == LATEST || num < 0 {
            return Ok(configs.last().expect("pristine config always present").clone());
        }
        configs.get(num as usize).cloned().ok_or_else(|| anyhow::anyhow!("no such config: {num}"))
    }
}
