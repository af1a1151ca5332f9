//! Metric instrument factories for pricequeue.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"pricequeue"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for pricequeue instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("pricequeue")
}

/// Counter: work item state transitions.
/// Labels: `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("pricequeue.item.state_transitions")
        .with_description("Number of work item state transitions")
        .build()
}

/// Counter: claims handed out by the store.
/// Labels: `kind` ("claimed" | "reclaimed" | "empty").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("pricequeue.queue.claims")
        .with_description("Number of claim operations")
        .build()
}

/// Counter: HTTP attempts.
/// Labels: `outcome` ("success" | "blocked" | "transient").
pub fn attempts() -> Counter<u64> {
    meter()
        .u64_counter("pricequeue.http.attempts")
        .with_description("Number of HTTP attempts by outcome")
        .build()
}

/// Counter: terminal item outcomes.
/// Labels: `outcome` ("done" | "failed"), `priced` ("true" | "false").
pub fn item_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("pricequeue.item.outcomes")
        .with_description("Number of items reaching a terminal state")
        .build()
}

/// Counter: store operations that returned an error.
/// Labels: `operation`.
pub fn store_failures() -> Counter<u64> {
    meter()
        .u64_counter("pricequeue.store.failures")
        .with_description("Number of failed store operations")
        .build()
}

/// Counter: checkpoint exports.
/// Labels: `status` ("written" | "error").
pub fn checkpoints() -> Counter<u64> {
    meter()
        .u64_counter("pricequeue.checkpoint.exports")
        .with_description("Number of checkpoint export attempts")
        .build()
}

/// Histogram: HTTP attempt latency in milliseconds, excluding deliberate delays.
/// Labels: `outcome`.
pub fn attempt_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("pricequeue.http.attempt_duration_ms")
        .with_description("HTTP attempt duration in milliseconds")
        .with_unit("ms")
        .build()
}
