//! Run repository
//!
//! Read access to run snapshots held by the emulation engine.

use async_trait::async_trait;
use purple_client::{EngineClient, Result};
use purple_core::domain::run::{Run, RunId};

/// Source of run snapshots
#[async_trait]
pub trait RunReader: Send + Sync {
    /// Fetches the current snapshot of a run
    ///
    /// Returns [`purple_client::ClientError::NotFound`] when the engine no
    /// longer knows the run.
    async fn get_run(&self, run_id: &RunId) -> Result<Run>;
}

/// HTTP implementation of RunReader
pub struct HttpRunReader {
    client: EngineClient,
}

impl HttpRunReader {
    pub fn new(client: EngineClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RunReader for HttpRunReader {
    async fn get_run(&self, run_id: &RunId) -> Result<Run> {
        self.client.get_run(run_id).await
    }
}
