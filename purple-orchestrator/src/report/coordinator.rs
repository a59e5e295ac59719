//! Report coordinator
//!
//! Owns the lifecycle of report jobs:
//! - at most one live job per run id (queued, rendering or done)
//! - a bounded pool of rendering workers on the blocking thread pool
//! - a hard deadline per job; a late worker is abandoned, not cancelled
//!
//! Failed and timed out jobs release their run id so a later request can
//! start over.

use chrono::Utc;
use purple_core::domain::detection::Detections;
use purple_core::domain::report::ReportJob;
use purple_core::domain::run::{InvalidIdentifier, Run, RunId, RunState};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::pdf::{DocumentRenderer, RenderError};
use crate::fs::{FileSystem, FsError};
use crate::service::DetectionCorrelator;
use crate::task_group::TaskGroup;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    InvalidRun(#[from] InvalidIdentifier),

    #[error("run {run_id} is {state}, reports need a finished run")]
    NotFinished { run_id: String, state: RunState },

    #[error("report coordinator is shutting down")]
    Closed,
}

/// Why a job ended in `failed`
#[derive(Debug, Error)]
enum JobFailure {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("output write failed: {0}")]
    Write(#[from] FsError),

    #[error("render worker crashed: {0}")]
    Crashed(String),

    #[error("worker pool closed")]
    PoolClosed,

    #[error("worker abandoned after deadline")]
    Abandoned,
}

/// Finished partial jobs kept for inspection; older ones are forgotten
const MAX_RETAINED_PARTIALS: usize = 16;

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub workers: usize,
    pub render_timeout: Duration,
    pub output_dir: PathBuf,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            workers: 3,
            render_timeout: Duration::from_secs(30),
            output_dir: PathBuf::from("data/reports"),
        }
    }
}

/// Caller's view of one report job
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: Uuid,
    updates: watch::Receiver<ReportJob>,
}

impl JobHandle {
    fn new(updates: watch::Receiver<ReportJob>) -> Self {
        let job_id = updates.borrow().id;
        Self { job_id, updates }
    }

    /// Latest known state of the job
    pub fn current(&self) -> ReportJob {
        self.updates.borrow().clone()
    }

    /// Waits until the job reaches a terminal state
    #[cfg(test)]
    pub async fn wait(&self) -> ReportJob {
        let mut updates = self.updates.clone();
        match updates.wait_for(|job| job.state.is_terminal()).await {
            Ok(job) => job.clone(),
            // Sender gone: the last value is all there will be
            Err(_) => self.current(),
        }
    }
}

type JobSlot = Arc<watch::Sender<ReportJob>>;

struct Inner {
    renderer: Arc<dyn DocumentRenderer>,
    correlator: Option<Arc<DetectionCorrelator>>,
    fs: Arc<dyn FileSystem>,
    workers: Arc<Semaphore>,
    settings: ReportSettings,
    /// Tracked jobs, keyed by run id
    jobs: Mutex<HashMap<String, JobSlot>>,
    /// Partial jobs, keyed by job id; never used for de-duplication
    partials: Mutex<HashMap<Uuid, JobSlot>>,
    tasks: TaskGroup,
}

#[derive(Clone)]
pub struct ReportCoordinator {
    inner: Arc<Inner>,
}

impl ReportCoordinator {
    pub fn new(
        renderer: Arc<dyn DocumentRenderer>,
        correlator: Option<Arc<DetectionCorrelator>>,
        fs: Arc<dyn FileSystem>,
        settings: ReportSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                renderer,
                correlator,
                fs,
                workers: Arc::new(Semaphore::new(settings.workers.max(1))),
                settings,
                jobs: Mutex::new(HashMap::new()),
                partials: Mutex::new(HashMap::new()),
                tasks: TaskGroup::new("reports"),
            }),
        }
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<String, JobSlot>> {
        self.inner.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn partials(&self) -> MutexGuard<'_, HashMap<Uuid, JobSlot>> {
        self.inner
            .partials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Requests the report for a finished run
    ///
    /// Returns the existing job when one is queued, rendering or done for
    /// the same run id; otherwise queues a new one.
    pub async fn request_report(&self, run: Run) -> Result<JobHandle, ReportError> {
        let run_id = RunId::parse(&run.id)?;
        if !run.is_finished() {
            return Err(ReportError::NotFinished {
                run_id: run_id.to_string(),
                state: run.state,
            });
        }

        let slot = {
            let mut jobs = self.tracked();
            if let Some(existing) = jobs.get(run_id.as_str()) {
                if existing.borrow().state.holds_run() {
                    info!("Report for run {} already requested", run_id);
                    return Ok(JobHandle::new(existing.subscribe()));
                }
            }

            let (slot, _) = watch::channel(ReportJob::queued(run_id.as_str(), false));
            let slot = Arc::new(slot);
            jobs.insert(run_id.to_string(), slot.clone());
            slot
        };

        self.launch(run, run_id, slot)
    }

    /// Renders a report for a run in any state
    ///
    /// The job is marked partial when the run has not finished and is not
    /// registered for de-duplication.
    pub async fn request_partial_report(&self, run: Run) -> Result<JobHandle, ReportError> {
        let run_id = RunId::parse(&run.id)?;
        let (slot, _) = watch::channel(ReportJob::queued(run_id.as_str(), !run.is_finished()));
        let slot = Arc::new(slot);

        let job_id = slot.borrow().id;
        {
            let mut partials = self.partials();
            prune_partials(&mut partials, MAX_RETAINED_PARTIALS);
            partials.insert(job_id, slot.clone());
        }

        self.launch(run, run_id, slot)
    }

    fn launch(&self, run: Run, run_id: RunId, slot: JobSlot) -> Result<JobHandle, ReportError> {
        let handle = JobHandle::new(slot.subscribe());
        info!("Queued report job {} for run {}", handle.job_id, run_id);

        let inner = Arc::clone(&self.inner);
        let task_slot = slot.clone();
        let spawned = self.inner.tasks.spawn("report", async move {
            execute(inner, run, run_id, task_slot).await;
        });

        if !spawned {
            transition(&slot, |job| job.failed("coordinator shutting down"));
            return Err(ReportError::Closed);
        }
        Ok(handle)
    }

    /// Tracked job for a run id, or the latest partial job for it
    pub fn job(&self, run_id: &str) -> Option<ReportJob> {
        if let Some(slot) = self.tracked().get(run_id) {
            return Some(slot.borrow().clone());
        }
        self.partials()
            .values()
            .map(|slot| slot.borrow().clone())
            .filter(|job| job.run_id == run_id)
            .max_by_key(|job| job.requested_at)
    }

    /// All known jobs, oldest first
    pub fn jobs(&self) -> Vec<ReportJob> {
        let mut all: Vec<ReportJob> = self
            .tracked()
            .values()
            .map(|slot| slot.borrow().clone())
            .collect();
        all.extend(self.partials().values().map(|slot| slot.borrow().clone()));
        all.sort_by_key(|job| job.requested_at);
        all
    }

    /// Idle rendering workers
    pub fn idle_workers(&self) -> usize {
        self.inner.workers.available_permits()
    }

    /// Refuses new jobs and waits for queued ones to settle
    pub async fn shutdown(&self) {
        self.inner.tasks.close();
        self.inner.tasks.drain().await;
    }
}

/// Drops the oldest finished partial jobs so at most `keep - 1` remain
fn prune_partials(partials: &mut HashMap<Uuid, JobSlot>, keep: usize) {
    let mut finished: Vec<(Uuid, chrono::DateTime<Utc>)> = partials
        .iter()
        .filter_map(|(id, slot)| {
            let job = slot.borrow();
            job.state.is_terminal().then_some((*id, job.requested_at))
        })
        .collect();

    let excess = (finished.len() + 1).saturating_sub(keep);
    if excess == 0 {
        return;
    }
    finished.sort_by_key(|(_, requested_at)| *requested_at);
    for (id, _) in finished.into_iter().take(excess) {
        partials.remove(&id);
    }
}

fn transition(slot: &JobSlot, step: impl FnOnce(ReportJob) -> ReportJob) {
    slot.send_modify(|job| *job = step(job.clone()));
}

fn output_path(settings: &ReportSettings, run_id: &RunId, partial: bool) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let name = if partial {
        format!("report_{}_{}_partial.pdf", run_id, stamp)
    } else {
        format!("report_{}_{}.pdf", run_id, stamp)
    };
    settings.output_dir.join(name)
}

async fn execute(inner: Arc<Inner>, run: Run, run_id: RunId, slot: JobSlot) {
    let detections = match &inner.correlator {
        Some(correlator) => correlator.fetch(&run).await,
        None => Detections::unavailable("detection correlation disabled"),
    };

    let partial = slot.borrow().partial;
    let path = output_path(&inner.settings, &run_id, partial);
    let abandoned = Arc::new(AtomicBool::new(false));

    let work = async {
        let permit = inner
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobFailure::PoolClosed)?;
        transition(&slot, ReportJob::rendering);

        let renderer = Arc::clone(&inner.renderer);
        let fs = Arc::clone(&inner.fs);
        let dir = inner.settings.output_dir.clone();
        let target = path.clone();
        let worker_abandoned = Arc::clone(&abandoned);

        // The permit moves into the worker so an abandoned render keeps its
        // slot until it really finishes.
        tokio::task::spawn_blocking(move || -> Result<usize, JobFailure> {
            let _permit = permit;
            let bytes = renderer.render(&run, &detections)?;
            drop(detections);
            drop(run);

            if worker_abandoned.load(Ordering::SeqCst) {
                return Err(JobFailure::Abandoned);
            }
            fs.create_dir_all(&dir)?;
            fs.write_atomic(&target, &bytes)?;
            let size = bytes.len();
            drop(bytes);

            // Deadline passed while writing: the job is not done, so no file
            if worker_abandoned.load(Ordering::SeqCst) {
                fs.remove_file(&target)?;
                return Err(JobFailure::Abandoned);
            }
            Ok(size)
        })
        .await
        .map_err(|e| JobFailure::Crashed(e.to_string()))?
    };

    match tokio::time::timeout(inner.settings.render_timeout, work).await {
        Ok(Ok(size)) => {
            info!(
                "Report for run {} written to {} ({} bytes)",
                run_id,
                path.display(),
                size
            );
            transition(&slot, |job| job.done(path));
        }
        Ok(Err(e)) => {
            error!("Report for run {} failed: {}", run_id, e);
            transition(&slot, |job| job.failed(e.to_string()));
        }
        Err(_) => {
            warn!(
                "Report for run {} exceeded {:?}, abandoning worker",
                run_id, inner.settings.render_timeout
            );
            abandoned.store(true, Ordering::SeqCst);
            discard_output(&inner, &path).await;
            let message = format!(
                "rendering exceeded {}s",
                inner.settings.render_timeout.as_secs()
            );
            transition(&slot, |job| job.timed_out(message));
        }
    }
}

/// Removes output a worker may have renamed into place just before the
/// deadline fired
async fn discard_output(inner: &Inner, path: &std::path::Path) {
    let fs = Arc::clone(&inner.fs);
    let target = path.to_path_buf();
    match tokio::task::spawn_blocking(move || fs.remove_file(&target)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Could not discard late report output: {}", e),
        Err(e) => warn!("Could not discard late report output: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::service::{CircuitBreaker, CorrelatorSettings};
    use crate::testing::{FakeRenderer, FakeStore, ReadOnlyFs, bucket, run_with_steps, sample_run};
    use purple_core::domain::detection::DetectionStatus;
    use purple_core::domain::report::JobState;

    fn coordinator(
        renderer: Arc<FakeRenderer>,
        dir: &std::path::Path,
        workers: usize,
        timeout: Duration,
    ) -> ReportCoordinator {
        ReportCoordinator::new(
            renderer,
            None,
            Arc::new(LocalFileSystem),
            ReportSettings {
                workers,
                render_timeout: timeout,
                output_dir: dir.to_path_buf(),
            },
        )
    }

    #[tokio::test]
    async fn test_report_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::new());
        let coordinator = coordinator(renderer.clone(), dir.path(), 3, Duration::from_secs(5));

        let handle = coordinator
            .request_report(sample_run("op-alpha-0001"))
            .await
            .unwrap();
        let job = handle.wait().await;

        assert_eq!(job.state, JobState::Done);
        let output = job.output.unwrap();
        assert!(output.exists());
        let name = output.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("report_op-alpha-0001_"));
        assert!(name.ends_with(".pdf"));
        assert!(!renderer.seen()[0].is_available());
    }

    #[tokio::test]
    async fn test_duplicate_requests_share_one_job() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::slow(Duration::from_millis(100)));
        let coordinator = coordinator(renderer.clone(), dir.path(), 3, Duration::from_secs(5));
        let run = sample_run("op-alpha-0001");

        let first = coordinator.request_report(run.clone()).await.unwrap();
        let second = coordinator.request_report(run.clone()).await.unwrap();
        assert_eq!(first.job_id, second.job_id);

        first.wait().await;
        let third = coordinator.request_report(run).await.unwrap();
        assert_eq!(third.job_id, first.job_id);
        assert_eq!(third.current().state, JobState::Done);

        coordinator.shutdown().await;
        assert_eq!(renderer.calls(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_job() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::slow(Duration::from_millis(50)));
        let coordinator = coordinator(renderer.clone(), dir.path(), 3, Duration::from_secs(5));

        let mut requests = Vec::new();
        for _ in 0..10 {
            let coordinator = coordinator.clone();
            requests.push(tokio::spawn(async move {
                coordinator
                    .request_report(sample_run("op-alpha-0001"))
                    .await
                    .unwrap()
                    .job_id
            }));
        }

        let mut ids = Vec::new();
        for request in requests {
            ids.push(request.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        coordinator.shutdown().await;
        assert_eq!(renderer.calls(), 1);
    }

    #[tokio::test]
    async fn test_unfinished_run_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(Arc::new(FakeRenderer::new()), dir.path(), 3, Duration::from_secs(5));
        let run = run_with_steps("op-live-0001", RunState::Running, vec![]);

        let err = coordinator.request_report(run).await.unwrap_err();

        assert!(matches!(err, ReportError::NotFinished { .. }));
        assert!(coordinator.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_partial_report_is_untracked() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(Arc::new(FakeRenderer::new()), dir.path(), 3, Duration::from_secs(5));
        let run = run_with_steps("op-live-0001", RunState::Running, vec![]);

        let first = coordinator.request_partial_report(run.clone()).await.unwrap();
        let second = coordinator.request_partial_report(run).await.unwrap();

        assert_ne!(first.job_id, second.job_id);
        let job = first.wait().await;
        assert!(job.partial);
        assert_eq!(job.state, JobState::Done);
        assert!(job.output.unwrap().to_str().unwrap().ends_with("_partial.pdf"));
    }

    #[tokio::test]
    async fn test_timeout_releases_run() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::slow(Duration::from_millis(500)));
        let coordinator = coordinator(renderer.clone(), dir.path(), 3, Duration::from_millis(50));
        let run = sample_run("op-slow-0001");

        let first = coordinator.request_report(run.clone()).await.unwrap();
        let job = first.wait().await;
        assert_eq!(job.state, JobState::TimedOut);
        assert!(job.output.is_none());

        let retry = coordinator.request_report(run).await.unwrap();
        assert_ne!(retry.job_id, first.job_id);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_abandoned_worker_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::slow(Duration::from_millis(300)));
        let coordinator = coordinator(renderer.clone(), dir.path(), 3, Duration::from_millis(50));

        let job = coordinator
            .request_report(sample_run("op-slow-0001"))
            .await
            .unwrap()
            .wait()
            .await;
        assert_eq!(job.state, JobState::TimedOut);

        // Let the detached worker run to completion
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(renderer.calls(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(coordinator.idle_workers(), 3);
    }

    #[tokio::test]
    async fn test_finished_partials_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(Arc::new(FakeRenderer::new()), dir.path(), 3, Duration::from_secs(5));
        let run = run_with_steps("op-live-0001", RunState::Running, vec![]);

        let mut last = None;
        for _ in 0..50 {
            let handle = coordinator.request_partial_report(run.clone()).await.unwrap();
            handle.wait().await;
            last = Some(handle.job_id);
        }

        assert!(coordinator.jobs().len() <= MAX_RETAINED_PARTIALS);
        let latest = coordinator.job("op-live-0001").unwrap();
        assert_eq!(Some(latest.id), last);
    }

    #[tokio::test]
    async fn test_render_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(Arc::new(FakeRenderer::failing()), dir.path(), 3, Duration::from_secs(5));

        let job = coordinator
            .request_report(sample_run("op-alpha-0001"))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.unwrap().contains("injected failure"));
    }

    #[tokio::test]
    async fn test_renderer_panic_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(Arc::new(FakeRenderer::panicking()), dir.path(), 3, Duration::from_secs(5));

        let job = coordinator
            .request_report(sample_run("op-alpha-0001"))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(job.state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_unwritable_output_marks_failed() {
        let coordinator = ReportCoordinator::new(
            Arc::new(FakeRenderer::new()),
            None,
            Arc::new(ReadOnlyFs),
            ReportSettings::default(),
        );

        let job = coordinator
            .request_report(sample_run("op-alpha-0001"))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.unwrap().contains("output write failed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_pool_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(FakeRenderer::slow(Duration::from_millis(50)));
        let coordinator = coordinator(renderer.clone(), dir.path(), 2, Duration::from_secs(10));

        let mut handles = Vec::new();
        for i in 0..6 {
            let run = sample_run(&format!("op-pool-{:04}", i));
            handles.push(coordinator.request_report(run).await.unwrap());
        }
        for handle in &handles {
            assert_eq!(handle.wait().await.state, JobState::Done);
        }

        assert_eq!(renderer.calls(), 6);
        assert!(renderer.max_active() <= 2);
        assert_eq!(coordinator.idle_workers(), 2);
    }

    #[tokio::test]
    async fn test_detections_reach_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::new());
        store.set_buckets(vec![bucket("T1078", 1, false, &["Valid Accounts"])]);
        let correlator = Arc::new(DetectionCorrelator::new(
            store,
            Arc::new(CircuitBreaker::new("detection", 5, Duration::from_secs(60))),
            CorrelatorSettings::default(),
        ));
        let renderer = Arc::new(FakeRenderer::new());
        let coordinator = ReportCoordinator::new(
            renderer.clone(),
            Some(correlator),
            Arc::new(LocalFileSystem),
            ReportSettings {
                output_dir: dir.path().to_path_buf(),
                ..ReportSettings::default()
            },
        );

        coordinator
            .request_report(sample_run("op-alpha-0001"))
            .await
            .unwrap()
            .wait()
            .await;

        let seen = renderer.seen();
        assert_eq!(
            seen[0].lookup("T1078").unwrap().status,
            DetectionStatus::Detected
        );
    }
}
