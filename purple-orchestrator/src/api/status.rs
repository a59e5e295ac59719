//! Status API Handler
//!
//! Operational view of the pipeline: breaker positions, destinations and
//! job counts.

use axum::{Json, extract::State};
use purple_core::domain::report::JobState;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::api::AppState;
use crate::service::BreakerSnapshot;

#[derive(Debug, Serialize)]
pub struct PipelineStatus {
    pub store: String,
    pub fallback_dir: String,
    pub tagging_breaker: BreakerSnapshot,
    /// Absent when detection correlation is disabled
    pub detection_breaker: Option<BreakerSnapshot>,
    pub tag_slots_available: usize,
    pub pending_events: usize,
    pub idle_report_workers: usize,
    pub report_jobs: BTreeMap<String, usize>,
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<PipelineStatus> {
    let mut report_jobs = BTreeMap::new();
    for job in state.reports.jobs() {
        *report_jobs.entry(job.state.to_string()).or_insert(0) += 1;
    }
    for job_state in [JobState::Queued, JobState::Rendering, JobState::Done] {
        report_jobs.entry(job_state.to_string()).or_insert(0);
    }

    Json(PipelineStatus {
        store: state.tagging.store_location(),
        fallback_dir: state.tagging.fallback_location().display().to_string(),
        tagging_breaker: state.tagging.breaker(),
        detection_breaker: state.correlator.as_ref().map(|c| c.breaker()),
        tag_slots_available: state.tagging.available_slots(),
        pending_events: state.dispatcher.pending(),
        idle_report_workers: state.reports.idle_workers(),
        report_jobs,
    })
}
