//! Fallback store
//!
//! Durable local persistence for tag documents the store did not accept.
//! Records are never deleted by the pipeline; an operator replays or
//! archives them out of band.

use chrono::{DateTime, Utc};
use purple_core::domain::tag::TagDocument;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::fs::{FileSystem, FsError};

/// Failure to persist a fallback record
#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("failed to serialize fallback record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write fallback record: {0}")]
    Write(#[from] FsError),
}

/// Local sink for undeliverable tag documents
pub trait FallbackStore: Send + Sync {
    /// Persists one record and returns where it was written
    fn persist(&self, document: &TagDocument) -> Result<PathBuf, FallbackError>;

    /// Directory records are written to
    fn location(&self) -> &Path;
}

/// On-disk record layout
#[derive(Serialize)]
struct FallbackRecord<'a> {
    generated_at: DateTime<Utc>,
    document: &'a TagDocument,
}

/// Writes one JSON file per record into a directory
pub struct FileFallbackStore {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl FileFallbackStore {
    pub fn new(dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            dir: dir.into(),
            fs,
        }
    }

    /// `fallback_<YYYYmmdd_HHMMSS>_<run-id>_<8 hex>.json`
    ///
    /// The random suffix keeps two records for the same run within the same
    /// second apart. The run id has been validated, so it is path-safe.
    fn file_name(run_id: &str, at: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "fallback_{}_{}_{}.json",
            at.format("%Y%m%d_%H%M%S"),
            run_id,
            &suffix[..8]
        )
    }
}

impl FallbackStore for FileFallbackStore {
    fn persist(&self, document: &TagDocument) -> Result<PathBuf, FallbackError> {
        self.fs.create_dir_all(&self.dir)?;

        let generated_at = Utc::now();
        let record = FallbackRecord {
            generated_at,
            document,
        };
        let bytes = serde_json::to_vec_pretty(&record)?;

        let path = self
            .dir
            .join(Self::file_name(document.run_id(), generated_at));
        self.fs.write_atomic(&path, &bytes)?;

        tracing::info!("Fallback record written to {}", path.display());
        Ok(path)
    }

    fn location(&self) -> &Path {
        &self.dir
    }
}
