//! Item span helpers.
//!
//! Provides span creation and state-transition recording for work items
//! flowing through the coordinator.

use tracing::Span;

use crate::model::WorkId;

/// Start a span covering one item, from claim to terminal state.
///
/// The `item.state` field is declared empty and updated via
/// [`record_state_transition`].
pub fn start_item_span(key: &str, id: WorkId) -> Span {
    tracing::info_span!(
        "item.scrape",
        "item.key" = key,
        "item.id" = %id.0,
        "item.state" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("item.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
