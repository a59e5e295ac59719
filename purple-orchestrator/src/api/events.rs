//! Event API Handlers
//!
//! Ingestion of engine lifecycle events and the store connectivity test.

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use purple_core::domain::event::LifecycleEvent;
use purple_core::domain::run::{Run, RunState, Step, StepOutcome};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::TagOutcome;

/// POST /api/events
/// Accept a lifecycle event; work happens in the background
pub async fn post_event(
    State(state): State<AppState>,
    Json(event): Json<LifecycleEvent>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    tracing::debug!("Received {} event for {}", event.kind(), event.run_id());

    let kind = event.kind();
    let run_id = event.run_id().to_string();
    state.dispatcher.dispatch(event)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "event": kind, "run_id": run_id })),
    ))
}

/// POST /api/tag-test
/// Tag a synthetic finished run to verify the store path end to end
pub async fn tag_test(State(state): State<AppState>) -> ApiResult<Json<TagOutcome>> {
    let run = synthetic_run();
    tracing::info!("Sending test tag document {}", run.id);

    let outcome = state.tagging.tag(&run).await?;
    Ok(Json(outcome))
}

fn synthetic_run() -> Run {
    let suffix = Uuid::new_v4().simple().to_string();
    let now = Utc::now();
    let step = |technique: &str, tactic: &str| Step {
        technique_id: technique.to_string(),
        technique_name: None,
        tactic: tactic.to_string(),
        outcome: StepOutcome::Success,
        command: String::new(),
        output: None,
    };

    Run {
        id: format!("purple-test-{}", &suffix[..8]),
        name: "Connectivity Test".to_string(),
        tenant: "purple-test".to_string(),
        state: RunState::Finished,
        started_at: Some(now),
        finished_at: Some(now),
        steps: vec![step("T1059.001", "execution"), step("T1082", "discovery")],
    }
}
