//! Emulation engine DTOs
//!
//! Shape of the engine's `GET /api/v2/operations/{id}` response, trimmed to
//! the fields the pipeline reads.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::run::{Run, RunState, Step, StepOutcome};

/// Operation as returned by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub finish: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub chain: Vec<LinkDto>,
}

/// One executed link of an operation's chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDto {
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub output: Option<String>,
    pub ability: Option<AbilityDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityDto {
    #[serde(default)]
    pub technique_id: String,
    #[serde(default)]
    pub technique_name: Option<String>,
    #[serde(default)]
    pub tactic: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Link status codes used by the engine
const LINK_SUCCESS: i32 = 0;
const LINK_TIMEOUT: i32 = 124;
const LINK_TIMEOUT_LEGACY: i32 = -2;

impl From<OperationDto> for Run {
    fn from(op: OperationDto) -> Self {
        let steps = op
            .chain
            .into_iter()
            .filter_map(|link| {
                let ability = link.ability?;
                Some(Step {
                    technique_name: ability.technique_name.or(ability.name),
                    technique_id: ability.technique_id,
                    tactic: ability.tactic,
                    outcome: outcome_from_status(link.status),
                    command: link.command,
                    output: link.output,
                })
            })
            .collect();

        Run {
            id: op.id,
            name: op.name,
            tenant: op.group.unwrap_or_default(),
            state: state_from_engine(&op.state),
            started_at: op.start.as_deref().and_then(parse_timestamp),
            finished_at: op.finish.as_deref().and_then(parse_timestamp),
            steps,
        }
    }
}

fn outcome_from_status(status: i32) -> StepOutcome {
    match status {
        LINK_SUCCESS => StepOutcome::Success,
        LINK_TIMEOUT | LINK_TIMEOUT_LEGACY => StepOutcome::Timeout,
        _ => StepOutcome::Failure,
    }
}

fn state_from_engine(state: &str) -> RunState {
    match state {
        "finished" => RunState::Finished,
        "running" | "paused" | "run_one_link" | "cleanup" | "out_of_time" => RunState::Running,
        _ => RunState::Pending,
    }
}

/// Accepts RFC 3339 and the engine's `YYYY-mm-dd HH:MM:SS` form
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
