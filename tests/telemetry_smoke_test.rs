//! Smoke tests for the OTLP export path.
//!
//! These tests require an OTLP collector with Tempo, Prometheus and Loki
//! behind it, listening on the default local ports. Run with:
//! ```sh
//! cargo test --test telemetry_smoke_test -- --ignored --nocapture
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use opentelemetry::KeyValue;
use pricequeue::model::WorkId;
use pricequeue::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry, metrics, work};

static TELEMETRY: OnceLock<TelemetryGuard> = OnceLock::new();

fn ensure_telemetry() -> &'static TelemetryGuard {
    TELEMETRY.get_or_init(|| {
        init_telemetry(TelemetryConfig {
            endpoint: Some("http://localhost:4317".to_string()),
            service_name: "pricequeue-smoke-test".to_string(),
            default_filter: "info".to_string(),
        })
        .expect("failed to init telemetry")
    })
}

/// Force-flush all providers and give backends time to ingest.
async fn flush_and_wait(guard: &TelemetryGuard) {
    guard.force_flush();
    tokio::time::sleep(Duration::from_secs(8)).await;
}

async fn query(url: &str, params: &[(&str, &str)]) -> serde_json::Value {
    let resp = reqwest::Client::new()
        .get(url)
        .query(params)
        .send()
        .await
        .expect("backend query failed");
    assert!(resp.status().is_success(), "{url}: {}", resp.status());
    resp.json().await.expect("backend returned non-JSON")
}

#[test]
#[ignore]
fn smoke_item_lifecycle() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        {
            let span = work::start_item_span("78240", WorkId::new());
            let _enter = span.enter();
            work::record_state_transition(&span, "pending", "in_progress");
            tracing::info!(key = "78240", attempt = 1, "requesting quote");
            tracing::warn!(key = "78240", attempt = 1, "403 forbidden");
            work::record_state_transition(&span, "in_progress", "done");
        }

        for outcome in ["blocked", "success"] {
            metrics::attempts().add(1, &[KeyValue::new("outcome", outcome)]);
            metrics::attempt_duration_ms().record(180.0, &[KeyValue::new("outcome", outcome)]);
        }
        metrics::item_outcomes().add(
            1,
            &[
                KeyValue::new("outcome", "done"),
                KeyValue::new("priced", "true"),
            ],
        );

        flush_and_wait(guard).await;

        let traces = query(
            "http://localhost:3200/api/search",
            &[("tags", "service.name=pricequeue-smoke-test"), ("limit", "5")],
        )
        .await;
        let trace_count = traces["traces"].as_array().map_or(0, |t| t.len());
        println!("Tempo: {trace_count} trace(s)");
        assert!(trace_count > 0, "expected traces in Tempo");

        let series = query(
            "http://localhost:9090/api/v1/query",
            &[("query", "pricequeue_http_attempts_total")],
        )
        .await;
        let series_count = series["data"]["result"].as_array().map_or(0, |r| r.len());
        println!("Prometheus: {series_count} series");
        assert!(series_count > 0, "expected metrics in Prometheus");

        let logs = query(
            "http://localhost:3100/loki/api/v1/query_range",
            &[
                ("query", r#"{service_name="pricequeue-smoke-test"}"#),
                ("limit", "10"),
            ],
        )
        .await;
        let stream_count = logs["data"]["result"].as_array().map_or(0, |s| s.len());
        println!("Loki: {stream_count} stream(s)");
        assert!(stream_count > 0, "expected logs in Loki");
    });
}
