//! Tagging client
//!
//! Writes one tag document per run to the search-index store under the
//! store resilience policy:
//! - a semaphore bounds simultaneous outbound writes
//! - a circuit breaker short-circuits writes while the store is unhealthy
//! - every write runs under a hard timeout that also covers retries
//! - anything the store did not accept lands in the fallback store
//!
//! Remote failures never reach the caller. Only a failed fallback write is
//! reported as an error, because then the document is lost.

use purple_client::ClientError;
use purple_core::domain::run::{InvalidIdentifier, Run};
use purple_core::domain::tag::TagDocument;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::repository::DocumentStore;
use crate::sanitizer::{self, SanitizeLimits};
use crate::service::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::service::fallback::{FallbackError, FallbackStore};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Where a tag document ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "destination", rename_all = "snake_case")]
pub enum TagOutcome {
    SentToStore { document_id: String },
    SentToFallback { path: PathBuf, reason: FallbackReason },
}

/// Why a document was diverted to the fallback store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    BreakerOpen,
    Timeout,
    StoreError(String),
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::BreakerOpen => write!(f, "circuit breaker open"),
            FallbackReason::Timeout => write!(f, "store write timed out"),
            FallbackReason::StoreError(e) => write!(f, "{}", e),
        }
    }
}

/// Tagging failure surfaced to the caller
#[derive(Debug, Error)]
pub enum TagError {
    #[error(transparent)]
    Validation(#[from] InvalidIdentifier),

    #[error("document lost: {0}")]
    Fallback(#[from] FallbackError),

    #[error("fallback write interrupted: {0}")]
    Interrupted(String),

    #[error("tagging client is shut down")]
    Closed,
}

/// Resilience settings for [`TaggingClient`]
#[derive(Debug, Clone, Copy)]
pub struct TaggingSettings {
    pub concurrency: usize,
    /// Ceiling for one write including all retries
    pub store_timeout: Duration,
    pub max_retries: u32,
    pub limits: SanitizeLimits,
}

impl Default for TaggingSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            store_timeout: Duration::from_secs(35),
            max_retries: 3,
            limits: SanitizeLimits::default(),
        }
    }
}

/// Store writer with breaker, limiter, retries and fallback
pub struct TaggingClient {
    store: Arc<dyn DocumentStore>,
    fallback: Arc<dyn FallbackStore>,
    breaker: Arc<CircuitBreaker>,
    limiter: Semaphore,
    settings: TaggingSettings,
}

impl TaggingClient {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        fallback: Arc<dyn FallbackStore>,
        breaker: Arc<CircuitBreaker>,
        settings: TaggingSettings,
    ) -> Self {
        Self {
            store,
            fallback,
            breaker,
            limiter: Semaphore::new(settings.concurrency.max(1)),
            settings,
        }
    }

    /// Tags a run
    ///
    /// # Returns
    /// Where the document was written. Store problems yield
    /// [`TagOutcome::SentToFallback`], not an error.
    pub async fn tag(&self, run: &Run) -> Result<TagOutcome, TagError> {
        let document = sanitizer::build_tag_document(run, self.settings.limits).inspect_err(|e| {
            warn!("Refusing to tag run: {}", e);
        })?;

        let permit = self.limiter.acquire().await.map_err(|_| TagError::Closed)?;

        let Some(admission) = self.breaker.allow_request() else {
            drop(permit);
            debug!("Breaker open, diverting run {} to fallback", document.run_id());
            return self.divert(document, FallbackReason::BreakerOpen).await;
        };

        let result = tokio::time::timeout(self.settings.store_timeout, self.send(&document)).await;
        drop(permit);

        match result {
            Ok(Ok(document_id)) => {
                self.breaker.record_success(admission);
                info!(
                    "Tagged run {} ({} techniques)",
                    document.run_id(),
                    document.purple.technique_count
                );
                Ok(TagOutcome::SentToStore { document_id })
            }
            Ok(Err(e)) => {
                self.breaker.record_failure(admission);
                warn!("Store rejected tag for run {}: {}", document.run_id(), e);
                self.divert(document, FallbackReason::StoreError(e.to_string()))
                    .await
            }
            Err(_) => {
                self.breaker.record_failure(admission);
                warn!(
                    "Store write for run {} exceeded {:?}",
                    document.run_id(),
                    self.settings.store_timeout
                );
                self.divert(document, FallbackReason::Timeout).await
            }
        }
    }

    /// Writes with capped exponential backoff
    ///
    /// Non-retryable errors (4xx other than 429) end the loop immediately.
    async fn send(&self, document: &TagDocument) -> Result<String, ClientError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;

        loop {
            match self.store.put_document(document).await {
                Ok(id) => return Ok(id),
                Err(e) if !e.is_retryable() || attempt >= self.settings.max_retries => {
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    debug!(
                        "Store write attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, self.settings.max_retries, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn divert(
        &self,
        document: TagDocument,
        reason: FallbackReason,
    ) -> Result<TagOutcome, TagError> {
        let fallback = Arc::clone(&self.fallback);
        let run_id = document.run_id().to_string();

        let written = tokio::task::spawn_blocking(move || fallback.persist(&document))
            .await
            .map_err(|e| TagError::Interrupted(e.to_string()))?;

        match written {
            Ok(path) => Ok(TagOutcome::SentToFallback { path, reason }),
            Err(e) => {
                error!("Tag document for run {} lost: {}", run_id, e);
                Err(TagError::Fallback(e))
            }
        }
    }

    pub fn breaker(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub fn store_location(&self) -> String {
        self.store.describe()
    }

    pub fn fallback_location(&self) -> PathBuf {
        self.fallback.location().to_path_buf()
    }

    /// Free outbound slots
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::service::breaker::BreakerState;
    use crate::service::fallback::FileFallbackStore;
    use crate::testing::{FakeStore, ReadOnlyFs, run_with_steps, sample_run, step};
    use purple_core::domain::run::{RunState, StepOutcome};

    struct Harness {
        client: Arc<TaggingClient>,
        store: Arc<FakeStore>,
        dir: tempfile::TempDir,
    }

    fn harness(store: FakeStore, threshold: u32, settings: TaggingSettings) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store);
        let fallback = Arc::new(FileFallbackStore::new(
            dir.path().join("fallback"),
            Arc::new(LocalFileSystem),
        ));
        let breaker = Arc::new(CircuitBreaker::new("tagging", threshold, Duration::from_secs(60)));
        let client = Arc::new(TaggingClient::new(
            store.clone(),
            fallback,
            breaker,
            settings,
        ));
        Harness { client, store, dir }
    }

    fn no_retries() -> TaggingSettings {
        TaggingSettings {
            max_retries: 0,
            ..TaggingSettings::default()
        }
    }

    fn fallback_files(h: &Harness) -> usize {
        std::fs::read_dir(h.dir.path().join("fallback"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_healthy_store_receives_document() {
        let h = harness(FakeStore::new(), 5, no_retries());

        let outcome = h.client.tag(&sample_run("op-alpha-0001")).await.unwrap();

        assert_eq!(
            outcome,
            TagOutcome::SentToStore {
                document_id: "op-alpha-0001".to_string()
            }
        );
        let doc = h.store.document("op-alpha-0001").unwrap();
        assert_eq!(doc.techniques(), ["T1078", "T1059.001", "T1018"]);
        assert_eq!(fallback_files(&h), 0);
    }

    #[tokio::test]
    async fn test_server_error_goes_to_fallback() {
        let h = harness(FakeStore::failing(500), 5, no_retries());

        let outcome = h.client.tag(&sample_run("op-alpha-0001")).await.unwrap();

        let TagOutcome::SentToFallback { path, reason } = outcome else {
            panic!("expected fallback");
        };
        assert!(path.exists());
        assert!(matches!(reason, FallbackReason::StoreError(_)));
        assert_eq!(h.client.breaker().consecutive_failures, 1);
        assert_eq!(fallback_files(&h), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_errors_only() {
        let settings = TaggingSettings {
            max_retries: 2,
            ..TaggingSettings::default()
        };

        let h = harness(FakeStore::failing(503), 5, settings);
        h.client.tag(&sample_run("op-alpha-0001")).await.unwrap();
        assert_eq!(h.store.put_calls(), 3);

        let h = harness(FakeStore::failing(400), 5, settings);
        h.client.tag(&sample_run("op-alpha-0001")).await.unwrap();
        assert_eq!(h.store.put_calls(), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_store() {
        let h = harness(FakeStore::failing(500), 2, no_retries());

        h.client.tag(&sample_run("op-alpha-0001")).await.unwrap();
        h.client.tag(&sample_run("op-alpha-0002")).await.unwrap();
        assert_eq!(h.client.breaker().state, BreakerState::Open);

        h.store.set_failure(None);
        let outcome = h.client.tag(&sample_run("op-alpha-0003")).await.unwrap();

        assert!(matches!(
            outcome,
            TagOutcome::SentToFallback {
                reason: FallbackReason::BreakerOpen,
                ..
            }
        ));
        assert_eq!(h.store.put_calls(), 2);
        assert_eq!(fallback_files(&h), 3);
    }

    #[tokio::test]
    async fn test_slow_store_times_out_into_fallback() {
        let store = FakeStore::new();
        store.set_delay(Duration::from_secs(60));
        let settings = TaggingSettings {
            store_timeout: Duration::from_millis(50),
            ..no_retries()
        };
        let h = harness(store, 5, settings);

        let outcome = h.client.tag(&sample_run("op-alpha-0001")).await.unwrap();

        assert!(matches!(
            outcome,
            TagOutcome::SentToFallback {
                reason: FallbackReason::Timeout,
                ..
            }
        ));
        assert_eq!(h.client.breaker().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_invalid_run_id_sends_nothing() {
        let h = harness(FakeStore::new(), 5, no_retries());
        let run = run_with_steps("bad id!", RunState::Finished, vec![]);

        let err = h.client.tag(&run).await.unwrap_err();

        assert!(matches!(err, TagError::Validation(_)));
        assert_eq!(h.store.put_calls(), 0);
        assert_eq!(fallback_files(&h), 0);
    }

    #[tokio::test]
    async fn test_lost_document_is_an_error() {
        let store = Arc::new(FakeStore::failing(500));
        let fallback = Arc::new(FileFallbackStore::new("/nowhere", Arc::new(ReadOnlyFs)));
        let breaker = Arc::new(CircuitBreaker::new("tagging", 5, Duration::from_secs(60)));
        let client = TaggingClient::new(store, fallback, breaker, no_retries());

        let err = client.tag(&sample_run("op-alpha-0001")).await.unwrap_err();
        assert!(matches!(err, TagError::Fallback(_)));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let store = FakeStore::new();
        store.set_delay(Duration::from_millis(30));
        let settings = TaggingSettings {
            concurrency: 5,
            ..no_retries()
        };
        let h = harness(store, 5, settings);

        let mut handles = Vec::new();
        for i in 0..20 {
            let client = h.client.clone();
            handles.push(tokio::spawn(async move {
                client.tag(&sample_run(&format!("op-burst-{:04}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(h.store.document_count(), 20);
        assert!(h.store.max_in_flight() <= 5);
        assert_eq!(h.client.available_slots(), 5);
    }

    #[tokio::test]
    async fn test_large_run_is_truncated() {
        let h = harness(FakeStore::new(), 5, no_retries());
        let steps = (0..600)
            .map(|i| step(&format!("T{:04}", i), "discovery", StepOutcome::Success))
            .collect();
        let run = run_with_steps("op-large-0001", RunState::Finished, steps);

        h.client.tag(&run).await.unwrap();

        let doc = h.store.document("op-large-0001").unwrap();
        assert_eq!(doc.purple.technique_count, 500);
        assert_eq!(doc.techniques().len(), 500);
    }
}
