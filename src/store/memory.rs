//! In-process queue store.
//!
//! Items live in seed order behind a single mutex, which makes every
//! operation (claim included) atomic with respect to concurrent callers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::QueueStore;
use crate::error::{Error, Result};
use crate::model::*;

#[derive(Default)]
struct Inner {
    items: Vec<WorkItem>,
    by_key: HashMap<String, usize>,
}

impl Inner {
    fn item_mut(&mut self, key: &str) -> Result<&mut WorkItem> {
        let idx = *self
            .by_key
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        Ok(&mut self.items[idx])
    }
}

/// Queue store backed by process memory. Lost on exit.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    stall_after: chrono::Duration,
}

impl MemoryStore {
    pub fn new(stall_after: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            stall_after: chrono::Duration::from_std(stall_after)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Snapshot of every item in seed order.
    pub async fn items(&self) -> Vec<WorkItem> {
        self.inner.lock().await.items.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(15 * 60))
    }
}

fn transition(item: &mut WorkItem, to: State) -> Result<()> {
    if !item.state.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            from: item.state.to_string(),
            to: to.to_string(),
        });
    }
    let now = Utc::now();
    item.state = to;
    item.updated_at = now;
    if to.is_terminal() {
        item.resolved_at = Some(now);
    }
    Ok(())
}

fn claim_at(inner: &mut Inner, idx: usize) -> Result<Claim> {
    let item = &mut inner.items[idx];
    let from = item.state;
    transition(item, State::InProgress)?;
    item.claimed_at = Some(item.updated_at);
    Ok(Claim {
        item: item.clone(),
        from,
    })
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn seed(&self, keys: &[String]) -> Result<SeedReport> {
        let mut inner = self.inner.lock().await;
        let mut report = SeedReport::default();
        let now = Utc::now();

        for key in keys {
            if inner.by_key.contains_key(key) {
                report.skipped += 1;
                continue;
            }
            let idx = inner.items.len();
            inner.items.push(WorkItem {
                id: WorkId::new(),
                key: key.clone(),
                state: State::Pending,
                result: None,
                attempts: 0,
                claimed_at: None,
                created_at: now,
                updated_at: now,
                resolved_at: None,
            });
            inner.by_key.insert(key.clone(), idx);
            report.inserted += 1;
        }

        Ok(report)
    }

    async fn claim_next(&self) -> Result<Option<Claim>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        // Previously claimed pending items first, then fresh ones, then stalled.
        let pending = |i: &&WorkItem| i.state == State::Pending;
        let idx = inner
            .items
            .iter()
            .filter(pending)
            .find(|i| i.claimed_at.is_some())
            .or_else(|| inner.items.iter().find(pending))
            .or_else(|| {
                inner
                    .items
                    .iter()
                    .find(|i| i.state == State::InProgress && now - i.updated_at >= self.stall_after)
            })
            .map(|i| inner.by_key[&i.key]);

        idx.map(|idx| claim_at(&mut inner, idx)).transpose()
    }

    async fn claim_in_progress(&self) -> Result<Option<Claim>> {
        let mut inner = self.inner.lock().await;
        let idx = inner
            .items
            .iter()
            .filter(|i| i.state == State::InProgress)
            .min_by_key(|i| i.updated_at)
            .map(|i| inner.by_key[&i.key]);

        idx.map(|idx| claim_at(&mut inner, idx)).transpose()
    }

    async fn mark_in_progress(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let item = inner.item_mut(key)?;
        transition(item, State::InProgress)?;
        item.attempts += 1;
        Ok(())
    }

    async fn mark_done(&self, key: &str, result: &ScrapeResult) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let item = inner.item_mut(key)?;
        transition(item, State::Done)?;
        item.result = Some(result.clone());
        Ok(())
    }

    async fn mark_failed(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        transition(inner.item_mut(key)?, State::Failed)
    }

    async fn reset_stalled(&self) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut reset = 0;
        for item in inner
            .items
            .iter_mut()
            .filter(|i| i.state == State::InProgress)
        {
            transition(item, State::Pending)?;
            reset += 1;
        }
        Ok(reset)
    }

    async fn count_all(&self) -> Result<u64> {
        Ok(self.inner.lock().await.items.len() as u64)
    }

    async fn state_counts(&self) -> Result<StateCounts> {
        let inner = self.inner.lock().await;
        let mut counts = StateCounts::default();
        for item in &inner.items {
            counts.add(item.state, 1);
        }
        Ok(counts)
    }

    async fn get(&self, key: &str) -> Result<WorkItem> {
        let mut inner = self.inner.lock().await;
        inner.item_mut(key).map(|i| i.clone())
    }
}
