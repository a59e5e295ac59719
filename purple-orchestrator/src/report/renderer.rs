//! Report document model
//!
//! Pure transformation of a run snapshot plus detection results into the
//! sections of a report. Nothing here touches I/O; the PDF backend only
//! lays the model out.

use chrono::{DateTime, Utc};
use purple_core::domain::detection::{DetectionSummary, Detections};
use purple_core::domain::run::{Run, RunState, Step, StepOutcome};

/// ATT&CK enterprise tactics in kill chain order
pub const KILL_CHAIN: [&str; 14] = [
    "reconnaissance",
    "resource-development",
    "initial-access",
    "execution",
    "persistence",
    "privilege-escalation",
    "defense-evasion",
    "credential-access",
    "discovery",
    "lateral-movement",
    "collection",
    "command-and-control",
    "exfiltration",
    "impact",
];

pub const PARTIAL_NOTICE: &str = "PARTIAL - operation not yet complete";

/// Presentation details that do not come from the run
#[derive(Debug, Clone)]
pub struct Branding {
    pub company_name: String,
    pub generated_at: DateTime<Utc>,
}

impl Branding {
    pub fn new(company_name: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportDocument {
    pub title: String,
    /// Set when the run had not finished at render time
    pub partial: bool,
    pub branding: Branding,
    pub metadata: Vec<(String, String)>,
    pub statistics: RunStatistics,
    pub tactic_coverage: Vec<TacticCoverage>,
    pub detection: DetectionSection,
    pub techniques: Vec<TechniqueRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Percentage of successful steps, 0 for an empty run
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TacticCoverage {
    pub tactic: String,
    pub steps: usize,
    pub successful: usize,
    /// Share of all steps, in percent
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionSection {
    Summary(DetectionSummary),
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TechniqueRow {
    pub technique_id: String,
    pub technique_name: String,
    pub tactic: String,
    pub outcome: StepOutcome,
    pub detection: String,
}

pub fn statistics(steps: &[Step]) -> RunStatistics {
    let count = |outcome: StepOutcome| steps.iter().filter(|s| s.outcome == outcome).count();
    let total = steps.len();
    let successful = count(StepOutcome::Success);

    RunStatistics {
        total,
        successful,
        failed: count(StepOutcome::Failure),
        timed_out: count(StepOutcome::Timeout),
        success_rate: percent(successful, total),
    }
}

/// Groups steps by tactic
///
/// Known tactics come first in kill chain order; unknown tactics follow in
/// the order they were first executed.
pub fn tactic_coverage(steps: &[Step]) -> Vec<TacticCoverage> {
    let mut groups: Vec<TacticCoverage> = Vec::new();
    for step in steps {
        let tactic = match step.tactic.trim() {
            "" => "unknown",
            t => t,
        };
        let index = match groups.iter().position(|g| g.tactic == tactic) {
            Some(i) => i,
            None => {
                groups.push(TacticCoverage {
                    tactic: tactic.to_string(),
                    steps: 0,
                    successful: 0,
                    percent: 0.0,
                });
                groups.len() - 1
            }
        };
        groups[index].steps += 1;
        if step.outcome == StepOutcome::Success {
            groups[index].successful += 1;
        }
    }

    for group in &mut groups {
        group.percent = percent(group.steps, steps.len());
    }

    // Stable sort keeps first-seen order among unknown tactics
    groups.sort_by_key(|g| {
        KILL_CHAIN
            .iter()
            .position(|k| *k == g.tactic)
            .unwrap_or(KILL_CHAIN.len())
    });
    groups
}

/// Builds the report model for a run
pub fn build_document(run: &Run, detections: &Detections, branding: Branding) -> ReportDocument {
    let partial = run.state != RunState::Finished;
    let name = if run.name.trim().is_empty() {
        "Unnamed operation"
    } else {
        run.name.as_str()
    };

    let detection = match detections {
        Detections::Unavailable { reason } => DetectionSection::Unavailable(reason.clone()),
        Detections::Available { .. } => {
            DetectionSection::Summary(detections.summary().unwrap_or_default())
        }
    };

    let techniques = run
        .steps
        .iter()
        .map(|step| TechniqueRow {
            technique_id: step.technique_id.clone(),
            technique_name: step
                .technique_name
                .clone()
                .unwrap_or_else(|| "-".to_string()),
            tactic: step.tactic.clone(),
            outcome: step.outcome,
            detection: detection_label(detections, &step.technique_id),
        })
        .collect();

    ReportDocument {
        title: format!("Purple Team Exercise Report: {}", name),
        partial,
        metadata: metadata(run, &branding),
        branding,
        statistics: statistics(&run.steps),
        tactic_coverage: tactic_coverage(&run.steps),
        detection,
        techniques,
    }
}

fn metadata(run: &Run, branding: &Branding) -> Vec<(String, String)> {
    let timestamp = |t: Option<DateTime<Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    let duration = run
        .duration()
        .map(|d| format!("{}m {}s", d.num_minutes(), d.num_seconds() % 60))
        .unwrap_or_else(|| "-".to_string());

    vec![
        ("Operation ID".to_string(), run.id.clone()),
        ("Operation".to_string(), run.name.clone()),
        ("Client".to_string(), run.tenant.clone()),
        ("State".to_string(), run.state.to_string()),
        ("Started".to_string(), timestamp(run.started_at)),
        ("Finished".to_string(), timestamp(run.finished_at)),
        ("Duration".to_string(), duration),
        ("Generated".to_string(), timestamp(Some(branding.generated_at))),
    ]
}

fn detection_label(detections: &Detections, technique_id: &str) -> String {
    if !detections.is_available() {
        return "unavailable".to_string();
    }
    detections
        .lookup(technique_id)
        .map(|r| r.status.to_string())
        .unwrap_or_else(|| "pending".to_string())
}

fn percent(part: usize, total: usize) -> f64 {
    match total {
        0 => 0.0,
        total => part as f64 / total as f64 * 100.0,
    }
}
