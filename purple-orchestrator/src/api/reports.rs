//! Report API Handlers
//!
//! HTTP endpoints for requesting and inspecting report jobs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use purple_core::domain::report::ReportJob;
use purple_core::domain::run::RunId;
use serde::Deserialize;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub run_id: String,
    /// Render an unfinished run as a partial report instead of refusing
    #[serde(default)]
    pub allow_partial: bool,
}

/// POST /api/reports
/// Request the report for a run
pub async fn request_report(
    State(state): State<AppState>,
    Json(req): Json<ReportRequest>,
) -> ApiResult<(StatusCode, Json<ReportJob>)> {
    let run_id = RunId::parse(&req.run_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    tracing::info!("Report requested for run {}", run_id);

    let run = state.runs.get_run(&run_id).await?;

    let handle = if !run.is_finished() && req.allow_partial {
        state.reports.request_partial_report(run).await?
    } else {
        state.reports.request_report(run).await?
    };

    Ok((StatusCode::ACCEPTED, Json(handle.current())))
}

/// GET /api/reports
/// List all report jobs
pub async fn list_reports(State(state): State<AppState>) -> Json<Vec<ReportJob>> {
    Json(state.reports.jobs())
}

/// GET /api/reports/{run_id}
/// Get the report job for a run
pub async fn get_report(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ReportJob>> {
    tracing::debug!("Getting report for run: {}", run_id);

    state
        .reports
        .job(&run_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No report for run {}", run_id)))
}
