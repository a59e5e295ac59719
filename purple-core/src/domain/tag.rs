//! Tag document domain types
//!
//! A tag document marks a run's activity in the search-index store as
//! simulated so SIEM analysts can filter it. Field names follow ECS with
//! the `purple.*` namespace for ATT&CK data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::detection::DetectionStatus;
use crate::domain::run::RunState;

/// Maximum number of per-technique tags in `tags`
pub const MAX_TECHNIQUE_TAGS: usize = 50;

/// Maximum number of per-tactic tags in `tags`
pub const MAX_TACTIC_TAGS: usize = 20;

/// Write-once payload sent to the search-index store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDocument {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub purple: PurpleFields,
    pub tags: Vec<String>,
    pub purple_team_exercise: bool,
    pub client_id: String,
    pub severity: Severity,
    pub auto_close: bool,
}

/// ATT&CK metadata under the `purple.*` namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurpleFields {
    pub operation_id: String,
    pub operation_name: String,
    /// First technique, for single-valued SIEM filters
    pub technique: Option<String>,
    pub techniques: Vec<String>,
    pub tactic: Option<String>,
    pub tactics: Vec<String>,
    pub detection_status: DetectionStatus,
    pub technique_count: usize,
    pub status: RunState,
}

/// Alert severity advertised to the SIEM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl TagDocument {
    /// Assembles a document from already-sanitized parts
    ///
    /// Callers are responsible for validating the run id and cleaning the
    /// text and identifier lists beforehand.
    pub fn new(
        operation_id: String,
        operation_name: String,
        client_id: String,
        status: RunState,
        techniques: Vec<String>,
        tactics: Vec<String>,
    ) -> Self {
        let mut tags = vec!["purple_team".to_string(), "simulation".to_string()];
        tags.extend(
            techniques
                .iter()
                .take(MAX_TECHNIQUE_TAGS)
                .map(|t| format!("purple_{}", t)),
        );
        tags.extend(
            tactics
                .iter()
                .take(MAX_TACTIC_TAGS)
                .map(|t| format!("purple_{}", t.replace(' ', "_"))),
        );

        Self {
            timestamp: Utc::now(),
            purple: PurpleFields {
                operation_id,
                operation_name,
                technique: techniques.first().cloned(),
                technique_count: techniques.len(),
                techniques,
                tactic: tactics.first().cloned(),
                tactics,
                detection_status: DetectionStatus::Pending,
                status,
            },
            tags,
            purple_team_exercise: true,
            client_id,
            severity: Severity::Low,
            auto_close: true,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.purple.operation_id
    }

    pub fn techniques(&self) -> &[String] {
        &self.purple.techniques
    }
}
