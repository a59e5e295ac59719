//! Report job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One document-generation task for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportJob {
    pub id: Uuid,
    pub run_id: String,
    pub state: JobState,
    /// Rendered from a run that had not finished yet
    pub partial: bool,
    pub requested_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

impl ReportJob {
    /// Creates a queued job
    pub fn queued(run_id: impl Into<String>, partial: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            state: JobState::Queued,
            partial,
            requested_at: Utc::now(),
            finished_at: None,
            output: None,
            error: None,
        }
    }

    pub fn rendering(mut self) -> Self {
        self.state = JobState::Rendering;
        self
    }

    pub fn done(mut self, output: PathBuf) -> Self {
        self.state = JobState::Done;
        self.output = Some(output);
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.state = JobState::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn timed_out(mut self, error: impl Into<String>) -> Self {
        self.state = JobState::TimedOut;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Report job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Rendering,
    Done,
    Failed,
    TimedOut,
}

impl JobState {
    /// No further transitions happen from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::TimedOut)
    }

    /// Whether a job in this state still owns its run id
    ///
    /// Failed and timed out jobs release the run id so it can be retried.
    pub fn holds_run(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Rendering | JobState::Done)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Rendering => write!(f, "rendering"),
            JobState::Done => write!(f, "done"),
            JobState::Failed => write!(f, "failed"),
            JobState::TimedOut => write!(f, "timed_out"),
        }
    }
}
