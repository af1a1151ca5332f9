//! Core data model.
//!
//! A work item is one postal code waiting for a price quote. It has identity
//! (store id + key), lifecycle state, and, once done, the result that the
//! executor accepted for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work tracked by the queue store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Store-assigned identifier.
    pub id: WorkId,

    /// The opaque key this item was seeded with (a postal code).
    pub key: String,

    /// Current lifecycle state.
    pub state: State,

    /// Result of the accepted HTTP round-trip, present once `Done`.
    pub result: Option<ScrapeResult>,

    /// Number of HTTP attempts recorded against this item, across runs.
    pub attempts: u32,

    /// When the item was last claimed. `None` for never-claimed items.
    pub claimed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

/// An item handed out by a claim, together with the state it left.
#[derive(Debug, Clone)]
pub struct Claim {
    /// The item as stored after the claim (`in_progress`).
    pub item: WorkItem,
    /// `Pending` for fresh or reset items, `InProgress` for a recovered one.
    pub from: State,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Seeded, waiting to be claimed.
    Pending,
    /// Claimed by the worker. Left behind by a crash, this is a stalled item.
    InProgress,
    /// A response was accepted and its result stored. Terminal.
    Done,
    /// Attempts exhausted without an accepted response. Terminal.
    Failed,
}

impl State {
    pub const ALL: [State; 4] = [State::Pending, State::InProgress, State::Done, State::Failed];

    /// Can transition from self to `to`?
    ///
    /// `Done` and `Failed` are reachable from any state: the executor's
    /// terminal marks are unconditional.
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, InProgress) // per-attempt touch
                | (InProgress, Pending)    // stalled reset
                | (_, Done)
                | (_, Failed)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::InProgress => "in_progress",
            State::Done => "done",
            State::Failed => "failed",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for State {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(State::Pending),
            "in_progress" => Ok(State::InProgress),
            "done" => Ok(State::Done),
            "failed" => Ok(State::Failed),
            _ => Err(crate::error::Error::Other(format!("unknown state: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Synthetic person submitted with a quote request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub phone: String,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// The structured outcome of one accepted HTTP round-trip. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub item_key: String,
    /// Quoted total. `None` when the response carried no price or did not decode.
    pub extracted_value: Option<f64>,
    /// The decoded response, or the raw body as a JSON string when it did not decode.
    pub raw_payload: serde_json::Value,
    pub observed_at: DateTime<Utc>,
    /// The identity that was submitted for this request.
    pub identity: Identity,
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Process-lifetime counters owned by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub successful: u64,
    pub failed: u64,
    pub processed: u64,
}

impl RunCounters {
    pub fn record(&mut self, succeeded: bool) {
        self.processed += 1;
        if succeeded {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Percentage of processed items that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.successful as f64 / self.processed as f64 * 100.0
        }
    }
}

/// Number of items per state, as reported by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub done: u64,
    pub failed: u64,
}

impl StateCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.done + self.failed
    }

    pub fn get(&self, state: State) -> u64 {
        match state {
            State::Pending => self.pending,
            State::InProgress => self.in_progress,
            State::Done => self.done,
            State::Failed => self.failed,
        }
    }

    pub(crate) fn add(&mut self, state: State, n: u64) {
        match state {
            State::Pending => self.pending += n,
            State::InProgress => self.in_progress += n,
            State::Done => self.done += n,
            State::Failed => self.failed += n,
        }
    }
}

/// Outcome of seeding a batch of keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: u64,
    pub skipped: u64,
}
