//! Request executor: one logical "fetch the quote for item X" with bounded
//! retries.
//!
//! Every attempt re-marks the item `in_progress` before going out, so a
//! crash at any point leaves it stalled for `reset_stalled()` rather than
//! pending or lost. The HTTP session belongs to the executor alone.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::parser;
use super::pause::pause;
use super::request::RequestTemplate;
use crate::config::TimingSettings;
use crate::error::{Error, Result};
use crate::http::Transport;
use crate::identity::{IdentityGenerator, IdentitySource};
use crate::model::ScrapeResult;
use crate::proxy::ProxyRotator;
use crate::store::QueueStore;
use crate::telemetry::metrics;

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// HTTP 200 without the rate-limit marker.
    Accepted,
    /// HTTP 403.
    Blocked,
    /// Any other status, a rate-limited 200, or no response at all.
    Transient(TransientCause),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientCause {
    Status(u16),
    RateLimited,
    Network(String),
}

impl AttemptOutcome {
    fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Accepted => "success",
            AttemptOutcome::Blocked => "blocked",
            AttemptOutcome::Transient(_) => "transient",
        }
    }
}

/// How `execute` settled one item.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// The accepted result, or `None` once attempts ran out.
    pub result: Option<ScrapeResult>,
    /// Whether the terminal mark reached the store. When it did not, the
    /// item is still `in_progress` there.
    pub persisted: bool,
}

/// Record of one attempt. Lives only for the duration of `execute`.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub index: u32,
    /// Politeness delay slept before the request.
    pub delay: Duration,
    pub outcome: AttemptOutcome,
}

pub struct Executor {
    store: Arc<dyn QueueStore>,
    transport: Box<dyn Transport>,
    identities: Box<dyn IdentitySource>,
    proxies: ProxyRotator,
    template: RequestTemplate,
    timing: TimingSettings,
    rng: StdRng,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Box<dyn Transport>,
        template: RequestTemplate,
        timing: TimingSettings,
    ) -> Self {
        Self {
            store,
            transport,
            identities: Box::new(IdentityGenerator::new()),
            proxies: ProxyRotator::default(),
            template,
            timing,
            rng: StdRng::from_entropy(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_identities(mut self, identities: Box<dyn IdentitySource>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_proxies(mut self, proxies: ProxyRotator) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Seed the delay and form-field randomness.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn timing(&self) -> &TimingSettings {
        &self.timing
    }

    /// Fetch the quote for `item_key`, trying at most `max_attempts` times.
    ///
    /// Settles with the accepted result, or with `None` once attempts are
    /// exhausted (the item is then marked `failed`). Store failures are
    /// logged and reflected in [`Settlement::persisted`]. Errors only on
    /// cancellation, in which case the item is left `in_progress`.
    pub async fn execute(&mut self, item_key: &str, max_attempts: u32) -> Result<Settlement> {
        let max_attempts = max_attempts.max(1);
        let identity = self.identities.next_identity();
        let form = self.template.form_for(item_key, &identity, &mut self.rng);
        let mut history: Vec<RetryAttempt> = Vec::with_capacity(max_attempts as usize);

        for index in 0..max_attempts {
            if let Err(e) = self.store.mark_in_progress(item_key).await {
                store_failure("mark_in_progress", item_key, &e);
            }

            let delay = self.timing.politeness.sample(&mut self.rng);
            debug!(key = item_key, delay_ms = delay.as_millis() as u64, "politeness delay");
            pause(delay, &self.cancel).await?;

            let user_agent = self.identities.next_user_agent();
            let proxy = self.proxies.next();
            info!(
                key = item_key,
                attempt = index + 1,
                proxy = proxy.as_ref().map(|p| p.as_str()).unwrap_or("direct"),
                "requesting quote"
            );
            let request = self.template.request(&form, user_agent, proxy);

            let started = Instant::now();
            let reply = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                reply = self.transport.post_form(&request) => reply,
            };

            let outcome = match reply {
                Ok(reply) if reply.status == 200 && !self.template.is_rate_limited(&reply.body) => {
                    record_attempt(&AttemptOutcome::Accepted, started);
                    info!(key = item_key, attempt = index + 1, "quote accepted");
                    let result = parser::parse(&reply.body, item_key, identity);
                    let persisted = self.finish_done(&result).await;
                    return Ok(Settlement {
                        result: Some(result),
                        persisted,
                    });
                }
                Ok(reply) if reply.status == 200 => {
                    AttemptOutcome::Transient(TransientCause::RateLimited)
                }
                Ok(reply) if reply.status == 403 => AttemptOutcome::Blocked,
                Ok(reply) => AttemptOutcome::Transient(TransientCause::Status(reply.status)),
                Err(e) => AttemptOutcome::Transient(TransientCause::Network(e.to_string())),
            };
            record_attempt(&outcome, started);

            match &outcome {
                AttemptOutcome::Blocked => {
                    warn!(key = item_key, attempt = index + 1, "403 forbidden");
                    if index + 2 == max_attempts {
                        let user_agent = self.identities.next_user_agent();
                        self.transport.refresh_session(&user_agent).await;
                    }
                }
                AttemptOutcome::Transient(TransientCause::Status(status)) => {
                    warn!(key = item_key, attempt = index + 1, status, "unexpected status");
                }
                AttemptOutcome::Transient(TransientCause::RateLimited) => {
                    warn!(key = item_key, attempt = index + 1, "rate limit marker in response");
                }
                AttemptOutcome::Transient(TransientCause::Network(reason)) => {
                    error!(key = item_key, attempt = index + 1, error = %reason, "request failed");
                }
                AttemptOutcome::Accepted => {}
            }
            history.push(RetryAttempt {
                index,
                delay,
                outcome,
            });

            if index + 1 < max_attempts {
                let backoff = self.timing.backoff_window(index).sample(&mut self.rng);
                info!(key = item_key, delay_ms = backoff.as_millis() as u64, "backing off before retry");
                pause(backoff, &self.cancel).await?;
            }
        }

        warn!(key = item_key, attempts = ?history, "attempts exhausted");
        let persisted = self.finish_failed(item_key).await;
        Ok(Settlement {
            result: None,
            persisted,
        })
    }

    async fn finish_done(&self, result: &ScrapeResult) -> bool {
        let priced = result.extracted_value.is_some();
        metrics::item_outcomes().add(
            1,
            &[
                KeyValue::new("outcome", "done"),
                KeyValue::new("priced", priced.to_string()),
            ],
        );
        match self.store.mark_done(&result.item_key, result).await {
            Ok(()) => true,
            Err(e) => {
                store_failure("mark_done", &result.item_key, &e);
                false
            }
        }
    }

    async fn finish_failed(&self, item_key: &str) -> bool {
        metrics::item_outcomes().add(
            1,
            &[
                KeyValue::new("outcome", "failed"),
                KeyValue::new("priced", "false"),
            ],
        );
        match self.store.mark_failed(item_key).await {
            Ok(()) => true,
            Err(e) => {
                store_failure("mark_failed", item_key, &e);
                false
            }
        }
    }
}

fn record_attempt(outcome: &AttemptOutcome, started: Instant) {
    let labels = [KeyValue::new("outcome", outcome.label())];
    metrics::attempts().add(1, &labels);
    metrics::attempt_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &labels);
}

fn store_failure(operation: &'static str, key: &str, e: &Error) {
    error!(key, operation, error = %e, "store operation failed");
    metrics::store_failures().add(1, &[KeyValue::new("operation", operation)]);
}
