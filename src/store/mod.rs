//! Priority/delay store: the only code that talks to the shared ordered structure.
//!
//! Pending jobs are kept as serialized members of one sorted collection,
//! scored by their ready time in epoch milliseconds. Finished jobs go into
//! two capped history lists.

use async_trait::async_trait;

use crate::errors::Result;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Which history list a finished job is recorded in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishedKind {
    Completed,
    Failed,
}

/// Backend for pending and finished job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a member with the given score, replacing the score if it already exists
    async fn push(&self, member: &str, score: u64) -> Result<()>;

    /// Atomically remove and return the lowest-scored member with score <= `now`
    async fn claim(&self, now: u64) -> Result<Option<String>>;

    /// Remove a member, returning whether it was present
    async fn remove(&self, member: &str) -> Result<bool>;

    /// Members with score <= `max_score` (all if `None`), ascending by score
    async fn range(&self, max_score: Option<u64>, limit: usize) -> Result<Vec<(String, u64)>>;

    /// Number of pending members
    async fn len(&self) -> Result<usize>;

    /// Prepend a finished record to its history list, keeping at most `keep` entries
    async fn record_finished(&self, kind: FinishedKind, member: &str, keep: usize) -> Result<()>;

    /// Most recent finished records, newest first
    async fn finished(&self, kind: FinishedKind, limit: usize) -> Result<Vec<String>>;

    /// Drop all pending and finished records
    async fn clear(&self) -> Result<()>;
}
