//! Run domain types
//!
//! A run is one execution of an adversary-emulation campaign. It is owned by
//! the external engine; the pipeline only reads snapshots of it.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

/// Accepted run identifier shape
pub const RUN_ID_PATTERN: &str = "^[A-Za-z0-9-]{8,64}$";

static RUN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(RUN_ID_PATTERN).expect("run id pattern compiles"));

/// Snapshot of an emulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Raw identifier as reported by the engine (not yet validated)
    pub id: String,
    pub name: String,
    /// Client/tenant label the run was executed against
    #[serde(default)]
    pub tenant: String,
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Run {
    /// Returns true once the engine has marked the run as finished
    pub fn is_finished(&self) -> bool {
        self.state == RunState::Finished
    }

    /// Wall-clock duration between start and finish, if both are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(finish)) if finish >= start => Some(finish - start),
            _ => None,
        }
    }
}

/// Run lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Finished,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running => write!(f, "running"),
            RunState::Finished => write!(f, "finished"),
        }
    }
}

/// One executed technique within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub technique_id: String,
    pub technique_name: Option<String>,
    pub tactic: String,
    pub outcome: StepOutcome,
    /// Executed command; summarized in reports, never sent to the store
    #[serde(default)]
    pub command: String,
    pub output: Option<String>,
}

/// Execution outcome of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure,
    Timeout,
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Success => write!(f, "success"),
            StepOutcome::Failure => write!(f, "failure"),
            StepOutcome::Timeout => write!(f, "timeout"),
        }
    }
}

/// Rejected run identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid run identifier: {preview:?}")]
pub struct InvalidIdentifier {
    /// First characters of the rejected value, safe to log
    pub preview: String,
}

/// Run identifier that passed validation
///
/// Only ASCII alphanumerics and `-`, between 8 and 64 characters. Values of
/// this type are safe to embed in store queries, document ids and file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Validates a raw identifier
    pub fn parse(raw: &str) -> Result<Self, InvalidIdentifier> {
        if RUN_ID_RE.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidIdentifier {
                preview: raw.chars().take(16).collect(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RunId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RunId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_accepts_valid_formats() {
        assert!(RunId::parse("abc12345").is_ok());
        assert!(RunId::parse("test-operation-001").is_ok());
        assert!(RunId::parse("0b6f3c2e-9a41-4d8e-8a55-3f1f0c7b2d11").is_ok());
        assert!(RunId::parse(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_run_id_rejects_invalid_formats() {
        assert!(RunId::parse("abc").is_err());
        assert!(RunId::parse(&"a".repeat(65)).is_err());
        assert!(RunId::parse("test@operation").is_err());
        assert!(RunId::parse("op/../etc/passwd").is_err());
        assert!(RunId::parse("'; DROP TABLE operations--").is_err());
        assert!(RunId::parse("run_with_underscore").is_err());
        assert!(RunId::parse("abcd1234\n").is_err());
        assert!(RunId::parse("ab\u{e9}cd1234").is_err());
    }

    #[test]
    fn test_run_id_deserialize_validates() {
        let ok: Result<RunId, _> = serde_json::from_str("\"abcd-1234\"");
        assert!(ok.is_ok());

        let bad: Result<RunId, _> = serde_json::from_str("\"../../x\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_run_duration() {
        let start = Utc::now();
        let run = Run {
            id: "abcd1234".to_string(),
            name: "test".to_string(),
            tenant: String::new(),
            state: RunState::Finished,
            started_at: Some(start),
            finished_at: Some(start + chrono::Duration::seconds(90)),
            steps: vec![],
        };

        assert_eq!(run.duration(), Some(chrono::Duration::seconds(90)));
        assert!(run.is_finished());
    }
}
