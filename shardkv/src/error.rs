//! The client-visible error taxonomy and the narrow set of errors that can cross a task boundary.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// The closed set of outcomes a replica can report back to a client.
///
/// Unlike `anyhow::Error`, this type is part of the wire contract: it is serialized in every RPC
/// reply and its variants are meaningful to callers (see `SPEC_FULL.md` §7 for the retry policy
/// associated with each one).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Error)]
pub enum Err {
    #[error("ok")]
    Ok,
    #[error("not the leader of this group")]
    WrongLeader,
    #[error("this group does not own the requested shard")]
    WrongGroup,
    #[error("local config is behind the request's config")]
    UnknownConfig,
    #[error("local config is ahead of the request's config")]
    OutdatedConfig,
    #[error("replica is shutting down")]
    Shutdown,
}

impl Err {
    pub fn is_ok(self) -> bool {
        matches!(self, Err::Ok)
    }
}

/// Errors raised while proposing an operation to the consensus engine.
///
/// These never reach a client directly: they are narrowed to the closed `Err` enum at the
/// front-end boundary (see `server.rs`), mirroring how `async-raft` keeps `anyhow::Result`
/// internal to `RaftStorage` but exposes only `RaftError`/`ClientWriteError` at its public `Raft`
/// API.
#[derive(Debug, Error)]
pub enum ProposeError {
    #[error("not the leader")]
    NotLeader,
    #[error("consensus engine is shutting down")]
    ShuttingDown,
}

/// A replica-internal result type for operations that are not part of the client-visible
/// contract (codec failures, I/O, consensus plumbing). These are logged at the task boundary and
/// never panic.
pub type InternalResult<T> = anyhow::Result<T>;
