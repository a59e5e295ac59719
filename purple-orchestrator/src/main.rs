//! Purple Orchestrator
//!
//! Tags adversary-emulation activity in the SIEM and produces PDF summaries
//! of finished runs.
//!
//! Architecture:
//! - Configuration: load settings from environment or defaults
//! - Repositories: HTTP access to the engine (runs) and the store (documents)
//! - Services: circuit breakers, fallback store, tagging client, detection
//!   correlator
//! - Reports: document model, pagination, PDF backend, job coordinator
//! - Dispatcher: lifecycle events to supervised tag and report work
//! - API: axum router for events, reports and status
//!
//! On shutdown the server stops accepting requests, then in-flight events
//! and report jobs are drained before the process exits.

mod api;
mod config;
mod dispatcher;
mod fs;
mod report;
mod repository;
mod sanitizer;
mod service;
mod task_group;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::config::Config;
use crate::dispatcher::LifecycleDispatcher;
use crate::fs::{FileSystem, LocalFileSystem};
use crate::report::{PdfRenderer, ReportCoordinator, ReportSettings};
use crate::repository::{DocumentStore, HttpDocumentStore, HttpRunReader, RunReader};
use crate::sanitizer::SanitizeLimits;
use crate::service::{
    CircuitBreaker, CorrelatorSettings, DetectionCorrelator, FileFallbackStore, TaggingClient,
    TaggingSettings,
};
use purple_client::{EngineClient, StoreClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "purple_orchestrator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Purple Orchestrator");

    // Load configuration
    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: engine_url={}, store_url={}, index={}",
        config.engine_url, config.store_url, config.store_index
    );

    // Initialize clients
    let engine = EngineClient::new(&config.engine_url, &config.engine_api_key)
        .context("Failed to create engine client")?;
    let store_client = StoreClient::from_settings(&config.store_settings())
        .context("Failed to create store client")?;

    match store_client.info().await {
        Ok(info) => info!(
            "Connected to store cluster {}",
            info["cluster_name"].as_str().unwrap_or("unknown")
        ),
        Err(e) => warn!("Store not reachable at startup, tagging will fall back: {}", e),
    }

    let runs: Arc<dyn RunReader> = Arc::new(HttpRunReader::new(engine));
    let store: Arc<dyn DocumentStore> = Arc::new(HttpDocumentStore::new(
        store_client,
        &config.store_index,
        &config.detection_index,
        config.max_techniques,
    ));
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem);

    // Initialize services
    let tagging = Arc::new(TaggingClient::new(
        Arc::clone(&store),
        Arc::new(FileFallbackStore::new(&config.fallback_dir, Arc::clone(&fs))),
        Arc::new(CircuitBreaker::new(
            "tagging",
            config.breaker_threshold,
            config.breaker_reset,
        )),
        TaggingSettings {
            concurrency: config.tag_concurrency,
            store_timeout: config.store_timeout,
            max_retries: config.max_retries,
            limits: SanitizeLimits {
                max_techniques: config.max_techniques,
                ..SanitizeLimits::default()
            },
        },
    ));

    let correlator = config.detection_enabled.then(|| {
        Arc::new(DetectionCorrelator::new(
            Arc::clone(&store),
            Arc::new(CircuitBreaker::new(
                "detection",
                config.breaker_threshold,
                config.breaker_reset,
            )),
            CorrelatorSettings {
                query_timeout: config.detection_timeout,
                evasion_window: config.evasion_window,
            },
        ))
    });
    if correlator.is_none() {
        info!("Detection correlation disabled");
    }

    let reports = ReportCoordinator::new(
        Arc::new(PdfRenderer::new(&config.company_name)),
        correlator.clone(),
        Arc::clone(&fs),
        ReportSettings {
            workers: config.report_workers,
            render_timeout: config.report_timeout,
            output_dir: config.report_dir.clone(),
        },
    );

    let dispatcher = Arc::new(LifecycleDispatcher::new(
        Arc::clone(&runs),
        Arc::clone(&tagging),
        reports.clone(),
    ));

    info!("Services initialized");

    // Build router with all API endpoints
    let app = api::create_router(AppState {
        dispatcher: Arc::clone(&dispatcher),
        reports: reports.clone(),
        tagging,
        correlator,
        runs,
    });

    info!("Listening on {}", config.listen_addr);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Draining in-flight work");
    dispatcher.shutdown().await;
    reports.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
