//! Lifecycle dispatcher
//!
//! Turns engine lifecycle notifications into supervised work:
//! - `started`: logged only
//! - `state_changed`: fetch the run and re-tag it
//! - `finished`: fetch the run, then tag it and request its report
//!
//! Tagging and the report request run concurrently inside the event's task,
//! so neither waits on the other. Events may arrive more than once; the
//! store write is keyed by run id and the coordinator de-duplicates reports.

use purple_client::ClientError;
use purple_core::domain::event::LifecycleEvent;
use purple_core::domain::run::{InvalidIdentifier, Run, RunId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::report::{ReportCoordinator, ReportError};
use crate::repository::RunReader;
use crate::sanitizer;
use crate::service::{TagOutcome, TaggingClient};
use crate::task_group::TaskGroup;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    InvalidRun(#[from] InvalidIdentifier),

    #[error("dispatcher is shutting down")]
    Closed,
}

struct Inner {
    runs: Arc<dyn RunReader>,
    tagging: Arc<TaggingClient>,
    reports: ReportCoordinator,
}

pub struct LifecycleDispatcher {
    inner: Arc<Inner>,
    tasks: TaskGroup,
}

impl LifecycleDispatcher {
    pub fn new(
        runs: Arc<dyn RunReader>,
        tagging: Arc<TaggingClient>,
        reports: ReportCoordinator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runs,
                tagging,
                reports,
            }),
            tasks: TaskGroup::new("dispatcher"),
        }
    }

    /// Accepts one lifecycle event
    ///
    /// Returns once the work is scheduled. Invalid run ids are rejected
    /// before anything is fetched.
    pub fn dispatch(&self, event: LifecycleEvent) -> Result<(), DispatchError> {
        let run_id = sanitizer::run_id(event.run_id()).inspect_err(|e| {
            warn!("Dropping {} event: {}", event.kind(), e);
        })?;

        let inner = Arc::clone(&self.inner);
        let spawned = match event {
            LifecycleEvent::Started { .. } => {
                info!("Run {} started", run_id);
                return Ok(());
            }
            LifecycleEvent::StateChanged {
                old_state,
                new_state,
                ..
            } => {
                debug!(
                    "Run {} changed state {:?} -> {:?}",
                    run_id, old_state, new_state
                );
                self.tasks.spawn("state_changed", async move {
                    if let Some(run) = inner.fetch(&run_id).await {
                        inner.tag(&run).await;
                    }
                })
            }
            LifecycleEvent::Finished { .. } => {
                info!("Run {} finished", run_id);
                self.tasks.spawn("finished", async move {
                    if let Some(run) = inner.fetch(&run_id).await {
                        tokio::join!(inner.tag(&run), inner.request_report(run.clone()));
                    }
                })
            }
        };

        if spawned {
            Ok(())
        } else {
            Err(DispatchError::Closed)
        }
    }

    /// Tasks scheduled and not yet reaped
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Refuses new events and waits for in-flight ones
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.drain().await;
    }
}

impl Inner {
    async fn fetch(&self, run_id: &RunId) -> Option<Run> {
        match self.runs.get_run(run_id).await {
            Ok(run) => Some(run),
            Err(e) if e.is_not_found() => {
                warn!("Run {} no longer exists, dropping event", run_id);
                None
            }
            Err(e) => {
                warn!("Could not fetch run {}: {}", run_id, describe(&e));
                None
            }
        }
    }

    async fn tag(&self, run: &Run) {
        match self.tagging.tag(run).await {
            Ok(TagOutcome::SentToStore { document_id }) => {
                debug!("Run {} tagged as document {}", run.id, document_id);
            }
            Ok(TagOutcome::SentToFallback { path, reason }) => {
                info!(
                    "Run {} tag kept locally at {} ({})",
                    run.id,
                    path.display(),
                    reason
                );
            }
            // Already logged by the tagging client
            Err(_) => {}
        }
    }

    async fn request_report(&self, run: Run) {
        let run_id = run.id.clone();
        match self.reports.request_report(run).await {
            Ok(handle) => debug!("Run {} report job {}", run_id, handle.job_id),
            Err(e @ ReportError::NotFinished { .. }) => warn!("Skipping report: {}", e),
            Err(e) => error!("Could not request report for run {}: {}", run_id, e),
        }
    }
}

fn describe(e: &ClientError) -> String {
    match e {
        ClientError::RequestFailed(inner) if inner.is_timeout() => "engine timed out".to_string(),
        other => other.to_string(),
    }
}
