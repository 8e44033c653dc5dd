//! Receive CRM webhooks and mirror contacts and deals into the local cache.
use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use crm_common::cache::{CacheStore, MemoryCacheStore, PgCacheStore};
use crm_common::crm::HubSpotClient;
use crm_common::metrics::setup_metrics_recorder;
use crm_common::time::SystemTime;
use crm_sync::config::{Config, NonEmptyString};
use crm_sync::dispatch::Dispatcher;
use crm_sync::handlers::{self, AppState};

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await?;

    Ok(())
}

async fn cache_store(config: &Config) -> Result<Arc<dyn CacheStore + Send + Sync>> {
    if config.memory_store {
        tracing::warn!("using in-memory cache store, synced rows will not survive a restart");
        return Ok(Arc::new(MemoryCacheStore::new()));
    }

    let store = PgCacheStore::new(&config.database_url, config.max_pg_connections).await?;
    if config.run_migrations {
        store.migrate().await?;
    }

    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::init_from_env()?;

    let cache = cache_store(&config).await?;
    let crm = HubSpotClient::new(
        &config.hubspot_api_url,
        &config.hubspot_access_token,
        config.crm_request_timeout.0,
    )?;

    if config.hubspot_webhook_secret.is_none() {
        tracing::warn!("HUBSPOT_WEBHOOK_SECRET is not set, all webhook deliveries will be rejected");
    }

    let dispatcher = Dispatcher::new(Arc::new(crm), cache, Arc::new(SystemTime {}));
    let state = AppState::new(
        dispatcher,
        config
            .hubspot_webhook_secret
            .as_ref()
            .map(NonEmptyString::as_str)
            .map(str::to_owned),
    );

    let metrics = config.export_prometheus.then(setup_metrics_recorder);
    let app = handlers::app(
        state,
        config.max_body_size,
        config.concurrency_limit,
        metrics,
    );

    listen(app, config.bind()).await.map_err(|e| {
        tracing::error!("crm-sync http server failed, {}", e);
        e
    })
}
