//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific concern.

pub mod error;
pub mod events;
pub mod health;
pub mod reports;
pub mod status;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::dispatcher::LifecycleDispatcher;
use crate::report::ReportCoordinator;
use crate::repository::RunReader;
use crate::service::{DetectionCorrelator, TaggingClient};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<LifecycleDispatcher>,
    pub reports: ReportCoordinator,
    pub tagging: Arc<TaggingClient>,
    pub correlator: Option<Arc<DetectionCorrelator>>,
    pub runs: Arc<dyn RunReader>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline status
        .route("/api/status", get(status::get_status))
        // Lifecycle events from the engine
        .route("/api/events", post(events::post_event))
        // Report endpoints
        .route("/api/reports", post(reports::request_report))
        .route("/api/reports", get(reports::list_reports))
        .route("/api/reports/{run_id}", get(reports::get_report))
        // Store connectivity check
        .route("/api/tag-test", post(events::tag_test))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
