use std::convert::Infallible;
use std::future::ready;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crm_common::metrics::track_metrics;

use super::webhook;
use crate::dispatch::Dispatcher;

/// Shared handles for webhook handlers. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, webhook_secret: Option<String>) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            webhook_secret: webhook_secret.map(Arc::from),
        }
    }
}

pub fn add_routes(
    router: Router,
    state: AppState,
    max_body_size: usize,
    concurrency_limit: usize,
) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop, just check axum health
        .route(
            "/webhook",
            routing::post(webhook::post_webhook)
                .get(webhook::get_webhook)
                .with_state(state)
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
}

/// The full service router: webhook routes, optional metrics endpoint, tracing and HTTP metrics.
pub fn app(
    state: AppState,
    max_body_size: usize,
    concurrency_limit: usize,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let router = add_routes(Router::new(), state, max_body_size, concurrency_limit);

    // Installing a global recorder when used as a library (during tests etc) does not work well,
    // so the caller decides whether to expose one.
    let router = match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", routing::get(move || ready(recorder_handle.render())))
        }
        None => router,
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
}

pub async fn index() -> &'static str {
    "crm-sync"
}
