//! Scrape coordinator: drains the queue through one executor.
//!
//! `Starting → Running → (CoolingDown ⇄ Running) → Completed`. The run ends
//! when no item is left `pending` or `in_progress`, or when the cancellation
//! token fires; the item total only feeds the progress percentage.

use std::path::PathBuf;
use std::sync::Arc;

use opentelemetry::KeyValue;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

use super::executor::Executor;
use super::pause::pause;
use crate::checkpoint::{CheckpointRow, CheckpointWriter};
use crate::config::{StoreSettings, TimingSettings};
use crate::error::{Error, Result};
use crate::model::{Claim, RunCounters, State};
use crate::store::QueueStore;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_item_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    CoolingDown,
    Completed,
}

/// Summary returned by [`Coordinator::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub counters: RunCounters,
    /// Items in the store when the run started.
    pub total: u64,
    /// Items moved back to `pending` at start.
    pub reset: u64,
    pub cancelled: bool,
    /// Checkpoint files written during this run, oldest first.
    pub checkpoints: Vec<PathBuf>,
}

pub struct Coordinator {
    store: Arc<dyn QueueStore>,
    executor: Executor,
    writer: CheckpointWriter,
    timing: TimingSettings,
    store_settings: StoreSettings,
    cancel: CancellationToken,
    phase: Phase,
    counters: RunCounters,
    rows: Vec<CheckpointRow>,
    checkpoints: Vec<PathBuf>,
    rng: StdRng,
}

impl Coordinator {
    /// The executor is rebound to `cancel` so both stop together.
    pub fn new(
        store: Arc<dyn QueueStore>,
        executor: Executor,
        writer: CheckpointWriter,
        store_settings: StoreSettings,
        cancel: CancellationToken,
    ) -> Self {
        let timing = executor.timing().clone();
        Self {
            store,
            executor: executor.with_cancellation(cancel.clone()),
            writer,
            timing,
            store_settings,
            cancel,
            phase: Phase::Starting,
            counters: RunCounters::default(),
            rows: Vec::new(),
            checkpoints: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        self.enter(Phase::Starting);
        let reset = self.store.reset_stalled().await?;
        let total = self.store.count_all().await?;
        let counts = self.store.state_counts().await?;
        info!(
            total,
            reset,
            pending = counts.pending,
            in_progress = counts.in_progress,
            done = counts.done,
            failed = counts.failed,
            "starting run"
        );
        let finished_before = counts.done + counts.failed;

        self.enter(Phase::Running);
        let cancelled = match self.drain(total, finished_before).await {
            Ok(()) => false,
            Err(Error::Cancelled) => true,
            Err(e) => {
                error!(error = %e, "run aborted");
                self.checkpoint().await;
                return Err(e);
            }
        };

        if cancelled {
            warn!(processed = self.counters.processed, "run cancelled");
        } else {
            self.enter(Phase::Completed);
        }
        info!(
            successful = self.counters.successful,
            failed = self.counters.failed,
            processed = self.counters.processed,
            success_rate = %format!("{:.1}%", self.counters.success_rate()),
            "run finished"
        );
        self.checkpoint().await;

        Ok(RunReport {
            counters: self.counters,
            total,
            reset,
            cancelled,
            checkpoints: self.checkpoints.clone(),
        })
    }

    /// Claim and execute until the queue is empty. `Err(Cancelled)` on
    /// cancellation, `Err(StoreUnavailable)` once claims or terminal marks
    /// keep failing.
    async fn drain(&mut self, total: u64, finished_before: u64) -> Result<()> {
        let mut claim_failures = 0u32;
        let mut unsettled = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let claim = match self.next_claim().await {
                Ok(Some(claim)) => {
                    claim_failures = 0;
                    claim
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    claim_failures += 1;
                    metrics::store_failures().add(1, &[KeyValue::new("operation", "claim_next")]);
                    warn!(failures = claim_failures, error = %e, "claim failed");
                    if claim_failures >= self.store_settings.max_consecutive_failures {
                        return Err(Error::StoreUnavailable {
                            failures: claim_failures,
                            last_error: e.to_string(),
                        });
                    }
                    pause(self.store_settings.retry_delay(), &self.cancel).await?;
                    continue;
                }
            };

            let item = claim.item;
            let span = start_item_span(&item.key, item.id);
            record_state_transition(&span, claim.from.as_str(), State::InProgress.as_str());
            let settlement = self
                .executor
                .execute(&item.key, self.timing.max_attempts)
                .instrument(span.clone())
                .await?;

            // Not counted until the store agrees; the item stays in_progress
            // and comes back through `claim_in_progress`.
            if !settlement.persisted {
                unsettled += 1;
                warn!(key = %item.key, failures = unsettled, "terminal state not persisted");
                if unsettled >= self.store_settings.max_consecutive_failures {
                    return Err(Error::StoreUnavailable {
                        failures: unsettled,
                        last_error: format!("terminal state for {} not persisted", item.key),
                    });
                }
                pause(self.store_settings.retry_delay(), &self.cancel).await?;
                continue;
            }
            unsettled = 0;

            match settlement.result {
                Some(result) => {
                    record_state_transition(&span, State::InProgress.as_str(), State::Done.as_str());
                    self.counters.record(true);
                    self.rows.push(CheckpointRow::done(&result));
                }
                None => {
                    record_state_transition(&span, State::InProgress.as_str(), State::Failed.as_str());
                    self.counters.record(false);
                    self.rows.push(CheckpointRow::failed(&item.key));
                }
            }

            let processed = self.counters.processed;
            if is_multiple(processed, self.timing.checkpoint_every) {
                self.report_progress(total, finished_before);
                self.checkpoint().await;
            }
            if is_multiple(processed, self.timing.cooldown_every) {
                self.cool_down().await?;
            }
        }
    }

    /// `claim_next`, then any `in_progress` item it left behind. The
    /// coordinator is the only worker, so the run is over only when
    /// neither state has items.
    async fn next_claim(&self) -> Result<Option<Claim>> {
        if let Some(claim) = self.store.claim_next().await? {
            return Ok(Some(claim));
        }
        let claim = self.store.claim_in_progress().await?;
        if let Some(claim) = &claim {
            info!(key = %claim.item.key, "reclaiming unsettled item");
        }
        Ok(claim)
    }

    async fn cool_down(&mut self) -> Result<()> {
        self.enter(Phase::CoolingDown);
        let delay = self.timing.cooldown.sample(&mut self.rng);
        info!(
            processed = self.counters.processed,
            delay_ms = delay.as_millis() as u64,
            "cooling down"
        );
        pause(delay, &self.cancel).await?;
        self.enter(Phase::Running);
        Ok(())
    }

    fn report_progress(&self, total: u64, finished_before: u64) {
        let finished = finished_before + self.counters.processed;
        let percent = if total == 0 {
            0.0
        } else {
            finished as f64 / total as f64 * 100.0
        };
        info!(
            finished,
            total,
            progress = %format!("{percent:.1}%"),
            successful = self.counters.successful,
            failed = self.counters.failed,
            "progress"
        );
    }

    /// Export every row collected so far. Failures are logged, not raised.
    async fn checkpoint(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let writer = self.writer.clone();
        let rows = self.rows.clone();
        match tokio::task::spawn_blocking(move || writer.write(&rows)).await {
            Ok(Ok(Some(path))) => {
                metrics::checkpoints().add(1, &[KeyValue::new("status", "written")]);
                self.checkpoints.push(path);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                metrics::checkpoints().add(1, &[KeyValue::new("status", "error")]);
                error!(error = %e, "failed to write checkpoint");
            }
            Err(e) => {
                metrics::checkpoints().add(1, &[KeyValue::new("status", "error")]);
                error!(error = %e, "checkpoint task failed");
            }
        }
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            info!(from = ?self.phase, to = ?phase, "phase change");
        }
        self.phase = phase;
    }
}

fn is_multiple(n: u64, every: u64) -> bool {
    every > 0 && n > 0 && n % every == 0
}
