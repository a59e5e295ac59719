//! Detection correlator
//!
//! Asks the search-index store which executed techniques raised alerts.
//! Correlation is best-effort: every failure becomes
//! [`Detections::Unavailable`] and the report renders without it.

use chrono::{DateTime, TimeDelta, Utc};
use purple_core::domain::detection::{DetectionRecord, DetectionStatus, Detections};
use purple_core::domain::run::{Run, RunId};
use purple_core::dto::search::DetectionBucket;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::repository::DocumentStore;
use crate::sanitizer;
use crate::service::breaker::{BreakerSnapshot, CircuitBreaker};

#[derive(Debug, Clone, Copy)]
pub struct CorrelatorSettings {
    pub query_timeout: Duration,
    /// Time after the run finished before silence counts as evasion
    pub evasion_window: Duration,
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(10),
            evasion_window: Duration::from_secs(300),
        }
    }
}

pub struct DetectionCorrelator {
    store: Arc<dyn DocumentStore>,
    breaker: Arc<CircuitBreaker>,
    settings: CorrelatorSettings,
}

impl DetectionCorrelator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        breaker: Arc<CircuitBreaker>,
        settings: CorrelatorSettings,
    ) -> Self {
        Self {
            store,
            breaker,
            settings,
        }
    }

    /// Fetches per-technique detection outcomes for a run
    ///
    /// Never fails; problems are reported as `Unavailable { reason }`.
    pub async fn fetch(&self, run: &Run) -> Detections {
        let run_id = match RunId::parse(&run.id) {
            Ok(id) => id,
            Err(e) => return Detections::unavailable(e.to_string()),
        };

        let Some(admission) = self.breaker.allow_request() else {
            return Detections::unavailable("detection store circuit open");
        };

        let query = self.store.search_detections(&run_id);
        match tokio::time::timeout(self.settings.query_timeout, query).await {
            Ok(Ok(buckets)) => {
                self.breaker.record_success(admission);
                debug!(
                    "Detection query for run {} returned {} bucket(s)",
                    run_id,
                    buckets.len()
                );
                classify(run, &buckets, self.settings.evasion_window, Utc::now())
            }
            Ok(Err(e)) => {
                self.breaker.record_failure(admission);
                warn!("Detection query for run {} failed: {}", run_id, e);
                Detections::unavailable(format!("detection query failed: {}", e))
            }
            Err(_) => {
                self.breaker.record_failure(admission);
                warn!(
                    "Detection query for run {} exceeded {:?}",
                    run_id, self.settings.query_timeout
                );
                Detections::unavailable(format!(
                    "detection query timed out after {}s",
                    self.settings.query_timeout.as_secs()
                ))
            }
        }
    }

    pub fn breaker(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }
}

/// Joins store buckets onto the run's executed techniques
///
/// - `detected`: at least one alert matched
/// - `evaded`: explicitly marked evaded, or no alert once the evasion
///   window after the run's finish has passed
/// - `pending`: otherwise
pub fn classify(
    run: &Run,
    buckets: &[DetectionBucket],
    evasion_window: Duration,
    now: DateTime<Utc>,
) -> Detections {
    let by_technique: HashMap<&str, &DetectionBucket> = buckets
        .iter()
        .map(|b| (b.technique_id.as_str(), b))
        .collect();

    let window = TimeDelta::from_std(evasion_window).unwrap_or(TimeDelta::MAX);
    let window_passed = run
        .finished_at
        .and_then(|finished| finished.checked_add_signed(window))
        .is_some_and(|deadline| deadline <= now);

    let mut seen = HashSet::new();
    let records = run
        .steps
        .iter()
        .map(|s| s.technique_id.as_str())
        .filter(|t| sanitizer::is_valid_technique_id(t))
        .filter(|t| seen.insert(*t))
        .map(|technique| {
            let bucket = by_technique.get(technique);
            let status = match bucket {
                Some(b) if b.has_alert() => DetectionStatus::Detected,
                Some(b) if b.marked_evaded => DetectionStatus::Evaded,
                _ if window_passed => DetectionStatus::Evaded,
                _ => DetectionStatus::Pending,
            };

            DetectionRecord {
                technique_id: technique.to_string(),
                status,
                rule_name: bucket.and_then(|b| b.rule_names.first().cloned()),
                alert_count: bucket
                    .filter(|b| b.has_alert())
                    .map(|b| b.detected_count.max(b.rule_names.len() as u64))
                    .unwrap_or(0),
            }
        })
        .collect();

    Detections::Available { records }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeStore, bucket, run_with_steps, sample_run, step};
    use purple_core::domain::run::{RunState, StepOutcome};

    fn correlator(store: Arc<FakeStore>, threshold: u32) -> DetectionCorrelator {
        DetectionCorrelator::new(
            store,
            Arc::new(CircuitBreaker::new("detection", threshold, Duration::from_secs(60))),
            CorrelatorSettings::default(),
        )
    }

    #[test]
    fn test_classify_statuses() {
        let run = sample_run("op-alpha-0001");
        let buckets = vec![
            bucket("T1078", 2, false, &["Valid Accounts Login"]),
            bucket("T1059.001", 0, true, &[]),
        ];
        let just_finished = run.finished_at.unwrap();

        let detections = classify(&run, &buckets, Duration::from_secs(300), just_finished);

        let detected = detections.lookup("T1078").unwrap();
        assert_eq!(detected.status, DetectionStatus::Detected);
        assert_eq!(detected.rule_name.as_deref(), Some("Valid Accounts Login"));
        assert_eq!(detected.alert_count, 2);
        assert_eq!(detections.lookup("T1059.001").unwrap().status, DetectionStatus::Evaded);
        assert_eq!(detections.lookup("T1018").unwrap().status, DetectionStatus::Pending);
    }

    #[test]
    fn test_silence_becomes_evasion_after_window() {
        let run = sample_run("op-alpha-0001");
        let later = run.finished_at.unwrap() + TimeDelta::seconds(301);

        let detections = classify(&run, &[], Duration::from_secs(300), later);

        let summary = detections.summary().unwrap();
        assert_eq!(summary.evaded, 3);
        assert_eq!(summary.detected, 0);
    }

    #[test]
    fn test_running_run_never_evades_by_silence() {
        let run = run_with_steps(
            "op-alpha-0001",
            RunState::Running,
            vec![step("T1078", "persistence", StepOutcome::Success)],
        );

        let detections = classify(&run, &[], Duration::ZERO, Utc::now());
        assert_eq!(detections.lookup("T1078").unwrap().status, DetectionStatus::Pending);
    }

    #[tokio::test]
    async fn test_query_failure_is_unavailable() {
        let store = Arc::new(FakeStore::new());
        store.fail_search(true);

        let detections = correlator(store, 5).fetch(&sample_run("op-alpha-0001")).await;

        assert!(!detections.is_available());
    }

    #[tokio::test]
    async fn test_open_breaker_skips_query() {
        let store = Arc::new(FakeStore::new());
        store.fail_search(true);
        let correlator = correlator(store.clone(), 1);
        let run = sample_run("op-alpha-0001");

        correlator.fetch(&run).await;
        store.fail_search(false);
        let detections = correlator.fetch(&run).await;

        assert_eq!(store.search_calls(), 1);
        assert_eq!(
            detections,
            Detections::unavailable("detection store circuit open")
        );
    }

    #[tokio::test]
    async fn test_invalid_run_id_is_unavailable() {
        let store = Arc::new(FakeStore::new());
        let run = run_with_steps("x", RunState::Finished, vec![]);

        let detections = correlator(store.clone(), 5).fetch(&run).await;

        assert!(!detections.is_available());
        assert_eq!(store.search_calls(), 0);
    }
}
