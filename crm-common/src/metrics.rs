//! Prometheus recorder setup and HTTP metrics middleware shared by the sync binaries.
use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Buckets for request latencies, in seconds. CRM fetches dominate, so the tail goes past the
/// default client timeout.
const LATENCY_SECONDS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

pub fn setup_metrics_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .set_buckets(LATENCY_SECONDS)
        .unwrap()
        .install_recorder()
        .unwrap();

    describe_metrics();
    handle
}

fn describe_metrics() {
    for (name, description) in [
        ("crm_sync_events_received_total", "Webhook events received in authenticated deliveries"),
        ("crm_sync_events_synced_total", "Webhook events written to the cache"),
        ("crm_sync_events_skipped_total", "Webhook events with an unknown subscription type"),
        ("crm_sync_events_ignored_total", "Deletion events, which are never applied"),
        ("crm_sync_events_failed_total", "Webhook events that failed and were acknowledged anyway"),
    ] {
        describe_counter!(name, Unit::Count, description);
    }
    describe_counter!(
        "crm_sync_signature_rejected_total",
        Unit::Count,
        "Webhook deliveries rejected before parsing, by reason"
    );
    describe_histogram!(
        "crm_sync_crm_request_duration_seconds",
        Unit::Seconds,
        "Latency of CRM object fetches"
    );
    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "HTTP requests served, by method, matched path and status"
    );
    describe_histogram!(
        "http_requests_duration_seconds",
        Unit::Seconds,
        "HTTP request latency, by method, matched path and status"
    );
}

/// Middleware to record some common HTTP metrics.
/// Labels by the matched route template so ids in paths don't blow up cardinality.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().to_string();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
