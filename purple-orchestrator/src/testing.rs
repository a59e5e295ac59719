//! In-memory fakes shared by unit tests

use async_trait::async_trait;
use purple_client::{ClientError, Result};
use purple_core::domain::detection::Detections;
use purple_core::domain::run::{Run, RunId, RunState, Step, StepOutcome};
use purple_core::domain::tag::TagDocument;
use purple_core::dto::search::DetectionBucket;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::api::AppState;
use crate::dispatcher::LifecycleDispatcher;
use crate::fs::{FileSystem, FsError, LocalFileSystem};
use crate::report::renderer::{Branding, ReportDocument, build_document};
use crate::report::pdf::{DocumentRenderer, RenderError};
use crate::report::{ReportCoordinator, ReportSettings};
use crate::repository::{DocumentStore, RunReader};
use crate::service::{
    CircuitBreaker, CorrelatorSettings, DetectionCorrelator, FileFallbackStore, TaggingClient,
    TaggingSettings,
};

pub fn run_with_steps(id: &str, state: RunState, steps: Vec<Step>) -> Run {
    let started_at = chrono::Utc::now() - chrono::Duration::minutes(10);
    Run {
        id: id.to_string(),
        name: "Test Operation".to_string(),
        tenant: "acme".to_string(),
        state,
        started_at: Some(started_at),
        finished_at: (state == RunState::Finished).then(|| started_at + chrono::Duration::minutes(5)),
        steps,
    }
}

pub fn step(technique_id: &str, tactic: &str, outcome: StepOutcome) -> Step {
    Step {
        technique_id: technique_id.to_string(),
        technique_name: Some(format!("Technique {}", technique_id)),
        tactic: tactic.to_string(),
        outcome,
        command: "whoami".to_string(),
        output: None,
    }
}

/// Finished run with three steps across two tactics
pub fn sample_run(id: &str) -> Run {
    run_with_steps(
        id,
        RunState::Finished,
        vec![
            step("T1078", "persistence", StepOutcome::Success),
            step("T1059.001", "execution", StepOutcome::Success),
            step("T1018", "discovery", StepOutcome::Failure),
        ],
    )
}

// =============================================================================
// Run reader
// =============================================================================

#[derive(Default)]
pub struct FakeRunReader {
    runs: Mutex<HashMap<String, Run>>,
    calls: AtomicUsize,
}

impl FakeRunReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run(run: Run) -> Self {
        let reader = Self::new();
        reader.insert(run);
        reader
    }

    pub fn insert(&self, run: Run) {
        self.runs.lock().unwrap().insert(run.id.clone(), run);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunReader for FakeRunReader {
    async fn get_run(&self, run_id: &RunId) -> Result<Run> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.runs
            .lock()
            .unwrap()
            .get(run_id.as_str())
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("run {}", run_id)))
    }
}

// =============================================================================
// Document store
// =============================================================================

#[derive(Default)]
pub struct FakeStore {
    documents: Mutex<HashMap<String, TagDocument>>,
    fail_status: Mutex<Option<u16>>,
    delay: Mutex<Duration>,
    put_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    buckets: Mutex<Vec<DetectionBucket>>,
    search_fails: AtomicBool,
    search_calls: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store answering every write with `status`
    pub fn failing(status: u16) -> Self {
        let store = Self::new();
        store.set_failure(Some(status));
        store
    }

    pub fn set_failure(&self, status: Option<u16>) {
        *self.fail_status.lock().unwrap() = status;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_buckets(&self, buckets: Vec<DetectionBucket>) {
        *self.buckets.lock().unwrap() = buckets;
    }

    pub fn fail_search(&self, fail: bool) {
        self.search_fails.store(fail, Ordering::SeqCst);
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn document(&self, id: &str) -> Option<TagDocument> {
        self.documents.lock().unwrap().get(id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn put_document(&self, document: &TagDocument) -> Result<String> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(status) = *self.fail_status.lock().unwrap() {
            return Err(ClientError::api_error(status, "injected failure"));
        }

        let id = document.run_id().to_string();
        self.documents
            .lock()
            .unwrap()
            .insert(id.clone(), document.clone());
        Ok(id)
    }

    async fn search_detections(&self, _run_id: &RunId) -> Result<Vec<DetectionBucket>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.search_fails.load(Ordering::SeqCst) {
            return Err(ClientError::api_error(503, "search unavailable"));
        }
        Ok(self.buckets.lock().unwrap().clone())
    }

    fn describe(&self) -> String {
        "memory://store".to_string()
    }
}

pub fn bucket(technique_id: &str, detected: u64, evaded: bool, rules: &[&str]) -> DetectionBucket {
    DetectionBucket {
        technique_id: technique_id.to_string(),
        document_count: detected.max(1),
        detected_count: detected,
        marked_evaded: evaded,
        rule_names: rules.iter().map(|r| r.to_string()).collect(),
    }
}

// =============================================================================
// Filesystem
// =============================================================================

/// Filesystem refusing every write
pub struct ReadOnlyFs;

impl FileSystem for ReadOnlyFs {
    fn create_dir_all(&self, path: &Path) -> std::result::Result<(), FsError> {
        Err(read_only("create directory", path))
    }

    fn write_atomic(&self, path: &Path, _contents: &[u8]) -> std::result::Result<(), FsError> {
        Err(read_only("write", path))
    }

    fn remove_file(&self, path: &Path) -> std::result::Result<(), FsError> {
        Err(read_only("remove", path))
    }
}

fn read_only(action: &'static str, path: &Path) -> FsError {
    FsError {
        action,
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only filesystem"),
    }
}

// =============================================================================
// Renderer
// =============================================================================

/// Renderer producing a fixed payload after an optional blocking delay
#[derive(Default)]
pub struct FakeRenderer {
    delay: Duration,
    fail: bool,
    panic: bool,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    seen: Mutex<Vec<Detections>>,
    documents: Mutex<Vec<ReportDocument>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Detections passed to each render call
    pub fn seen(&self) -> Vec<Detections> {
        self.seen.lock().unwrap().clone()
    }

    /// Document models built for each render call
    pub fn documents(&self) -> Vec<ReportDocument> {
        self.documents.lock().unwrap().clone()
    }
}

impl DocumentRenderer for FakeRenderer {
    fn render(&self, run: &Run, detections: &Detections) -> std::result::Result<Vec<u8>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(detections.clone());
        self.documents
            .lock()
            .unwrap()
            .push(build_document(run, detections, Branding::new("Test")));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panic {
            panic!("renderer exploded");
        }
        if self.fail {
            return Err(RenderError::Pdf("injected failure".to_string()));
        }
        Ok(b"%PDF-1.5 fake".to_vec())
    }
}

// =============================================================================
// Application state
// =============================================================================

/// Fully wired state over fakes, writing under `dir`
pub fn app_state(runs: Arc<FakeRunReader>, store: Arc<FakeStore>, dir: &Path) -> AppState {
    let fs = Arc::new(LocalFileSystem);
    let tagging = Arc::new(TaggingClient::new(
        store.clone(),
        Arc::new(FileFallbackStore::new(dir.join("fallback"), fs.clone())),
        Arc::new(CircuitBreaker::new("tagging", 5, Duration::from_secs(60))),
        TaggingSettings {
            max_retries: 0,
            ..TaggingSettings::default()
        },
    ));
    let correlator = Arc::new(DetectionCorrelator::new(
        store,
        Arc::new(CircuitBreaker::new("detection", 5, Duration::from_secs(60))),
        CorrelatorSettings::default(),
    ));
    let reports = ReportCoordinator::new(
        Arc::new(FakeRenderer::new()),
        Some(correlator.clone()),
        fs,
        ReportSettings {
            output_dir: dir.join("reports"),
            ..ReportSettings::default()
        },
    );
    let dispatcher = Arc::new(LifecycleDispatcher::new(
        runs.clone(),
        tagging.clone(),
        reports.clone(),
    ));

    AppState {
        dispatcher,
        reports,
        tagging,
        correlator: Some(correlator),
        runs,
    }
}
