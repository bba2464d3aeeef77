//! The shard-assignment `Config` (§3) fetched from the external shard controller.
//!
//! Not to be confused with [`crate::runtime_config::RuntimeConfig`], which holds the process's
//! own tunables.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Number of shards the keyspace is statically partitioned into.
pub const N_SHARDS: usize = 10;

pub type GroupId = u64;

/// A versioned assignment of shards to groups, plus group membership.
///
/// `num == 0` means "no assignment yet" — a pristine controller state that no client op may be
/// served against (see `SPEC_FULL.md` §4.1 step 2).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub num: u64,
    pub shards: [GroupId; N_SHARDS],
    pub groups: BTreeMap<GroupId, Vec<String>>,
}

impl Config {
    pub fn new_empty() -> Self {
        Self {
            num: 0,
            shards: [0; N_SHARDS],
            groups: BTreeMap::new(),
        }
    }

    /// Group owning `shard` under this config, or `0` (no group) if unassigned.
    pub fn owner_of(&self, shard: usize) -> GroupId {
        self.shards[shard]
    }

    pub fn is_pristine(&self) -> bool {
        self.num == 0
    }
}

/// Maps a key to its shard via a stable hash of the first byte's worth of entropy in the key.
///
/// This mirrors the classic "sum of bytes mod NShards" shard function used by sharded stores
/// built for teaching purposes: it is deterministic, requires no external state, and is stable
/// across restarts since it is a pure function of the key bytes.
pub fn shard_of(key: &str) -> usize {
    if key.is_empty() {
        return 0;
    }
    let sum: u32 = key.bytes().map(u32::from).sum();
    (sum as usize) % N_SHARDS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_of_is_stable() {
        let a = shard_of("alpha");
        let b = shard_of("alpha");
        assert_eq!(a, b);
        assert!(a < N_SHARDS);
    }

    #[test]
    fn pristine_config_has_no_owners() {
        let c = Config::new_empty();
        assert!(c.is_pristine());
        assert_eq!(c.owner_of(3), 0);
    }
}
