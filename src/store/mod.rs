//! Work queue store contract.
//!
//! The coordinator and executor only ever talk to the durable store through
//! [`QueueStore`]. Any backend that can upsert-if-absent, claim atomically,
//! transition unconditionally, reset in bulk and count is substitutable.
//! [`crate::db::Db`] is the Postgres implementation; [`MemoryStore`] keeps
//! everything in process for tests and dry runs.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Claim, ScrapeResult, SeedReport, StateCounts, WorkItem};

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a `pending` item for every key not already present.
    async fn seed(&self, keys: &[String]) -> Result<SeedReport>;

    /// Atomically claim one `pending` item (`pending → in_progress`).
    ///
    /// Items claimed before (left behind by a crashed run and reset) come
    /// first. With nothing pending, falls back to one `in_progress` item
    /// untouched for longer than the stall lease, so concurrent workers never
    /// share a live claim. `None` means nothing is claimable right now; see
    /// [`QueueStore::claim_in_progress`] for the sole-worker fallback.
    async fn claim_next(&self) -> Result<Option<Claim>>;

    /// Claim the least recently touched `in_progress` item, ignoring the
    /// stall lease. Only safe when the caller is the sole worker: any item
    /// still `in_progress` is then one whose terminal mark never landed.
    async fn claim_in_progress(&self) -> Result<Option<Claim>>;

    /// Re-assert `in_progress` and count one more attempt.
    async fn mark_in_progress(&self, key: &str) -> Result<()>;

    /// Transition to `done` and store the result.
    async fn mark_done(&self, key: &str, result: &ScrapeResult) -> Result<()>;

    /// Transition to `failed`, whatever the current state.
    async fn mark_failed(&self, key: &str) -> Result<()>;

    /// Move every `in_progress` item back to `pending`. Returns how many moved.
    async fn reset_stalled(&self) -> Result<u64>;

    async fn count_all(&self) -> Result<u64>;

    async fn state_counts(&self) -> Result<StateCounts>;

    async fn get(&self, key: &str) -> Result<WorkItem>;
}
