//! Detection correlation domain types

use serde::{Deserialize, Serialize};

/// Whether the SIEM noticed an executed technique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Detected,
    Evaded,
    Pending,
}

impl std::fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionStatus::Detected => write!(f, "detected"),
            DetectionStatus::Evaded => write!(f, "evaded"),
            DetectionStatus::Pending => write!(f, "pending"),
        }
    }
}

/// Detection outcome for one technique of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub technique_id: String,
    pub status: DetectionStatus,
    pub rule_name: Option<String>,
    pub alert_count: u64,
}

/// Result of a detection query
///
/// `Available(vec![])` means the store was queried and nothing matched;
/// `Unavailable` means the store could not be queried at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detections {
    Available { records: Vec<DetectionRecord> },
    Unavailable { reason: String },
}

impl Detections {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    /// Looks up the record for a technique
    ///
    /// Returns `None` both when detections are unavailable and when the
    /// technique has no record; use [`Detections::is_available`] to tell
    /// the two apart.
    pub fn lookup(&self, technique_id: &str) -> Option<&DetectionRecord> {
        match self {
            Self::Available { records } => records.iter().find(|r| r.technique_id == technique_id),
            Self::Unavailable { .. } => None,
        }
    }

    /// Aggregated counts, or `None` when unavailable
    pub fn summary(&self) -> Option<DetectionSummary> {
        let Self::Available { records } = self else {
            return None;
        };

        let mut summary = DetectionSummary::default();
        for record in records {
            match record.status {
                DetectionStatus::Detected => summary.detected += 1,
                DetectionStatus::Evaded => summary.evaded += 1,
                DetectionStatus::Pending => summary.pending += 1,
            }
        }
        Some(summary)
    }
}

/// Per-status counts over a set of detection records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub detected: usize,
    pub evaded: usize,
    pub pending: usize,
}

impl DetectionSummary {
    pub fn total(&self) -> usize {
        self.detected + self.evaded + self.pending
    }

    /// Share of detected techniques in percent, 0 when there are none
    pub fn coverage_percent(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.detected as f64 / total as f64 * 100.0,
        }
    }
}
