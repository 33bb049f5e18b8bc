//! Swap Broker - exchange transaction orchestration across external providers
//!
//! The broker claims exchange transactions from the shared store, picks the
//! provider with the best cached rate, creates the remote order and tracks
//! it to completion by polling or batch-sweeping provider status.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod cache;
mod config;
mod dispatch;
mod error;
mod metrics;
mod processor;
mod providers;
mod rates;
mod state;
mod transaction;

use cache::{PgCacheBackend, RateCache};
use config::Settings;
use dispatch::TransactionDispatcher;
use metrics::MetricsServer;
use providers::ProviderRegistry;
use state::{PgTransactionStore, TransactionStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Swap Broker v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} providers (instance {})",
        settings.enabled_providers().len(),
        settings.engine.instance_id
    );

    // Initialize database connection
    let pg_store = PgTransactionStore::new(&settings.database).await?;
    info!("Database connection established");

    let cache_backend = Arc::new(PgCacheBackend::new(pg_store.pool()));
    if settings.database.bootstrap_schema {
        pg_store.bootstrap_schema().await?;
        cache_backend.bootstrap_schema().await?;
        info!("Database schema bootstrap complete");
    }

    let store: Arc<dyn TransactionStore> = Arc::new(pg_store);
    let cache = RateCache::new(cache_backend, settings.cache.max_rate_age_secs);

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // One client per enabled provider
    let registry = Arc::new(ProviderRegistry::from_settings(&settings)?);

    let dispatcher = Arc::new(TransactionDispatcher::new(
        store.clone(),
        cache.clone(),
        registry.clone(),
        settings.engine.clone(),
        settings.processor.clone(),
    ));
    info!("Dispatcher initialized ({:?} selection)", settings.engine.selection);

    // Pick up work an earlier process left behind
    let resumed = dispatcher.resume().await?;
    info!("Restart recovery complete ({} pollers re-attached)", resumed);

    dispatcher.start_sweepers(&settings.enabled_providers());

    // Start API server
    let api_handle = tokio::spawn({
        let state = api::AppState {
            store: store.clone(),
            cache: cache.clone(),
            dispatcher: dispatcher.clone(),
            providers: registry.priority().to_vec(),
            started_at: Instant::now(),
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start intake loop
    let intake_handle = tokio::spawn(dispatcher.clone().run_intake());

    // Health check loop
    let health_handle = tokio::spawn({
        let store = store.clone();
        let cache = cache.clone();
        let interval = settings.engine.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let healthy = match store.health_check().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Database health check failed: {}", e);
                        false
                    }
                };
                metrics::record_store_health(healthy);

                if let Err(e) = cache.health_check().await {
                    warn!("Rate cache health check failed: {}", e);
                }
            }
        }
    });

    info!("Swap Broker is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Stop claiming before aborting in-flight work
    intake_handle.abort();
    dispatcher.shutdown();

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Swap Broker stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swap_broker=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
