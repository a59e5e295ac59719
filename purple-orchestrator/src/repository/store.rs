//! Document store repository
//!
//! Handles communication with the search-index store:
//! - Writing tag documents keyed by run id
//! - Aggregating detection evidence per technique

use async_trait::async_trait;
use purple_client::{Result, StoreClient};
use purple_core::domain::run::RunId;
use purple_core::domain::tag::TagDocument;
use purple_core::dto::search::DetectionBucket;

/// Repository trait for the search-index store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Writes a tag document and returns the id the store assigned
    ///
    /// The document id is the run id, so a repeated write replaces the
    /// earlier version.
    async fn put_document(&self, document: &TagDocument) -> Result<String>;

    /// Returns alert evidence for a run, one bucket per technique
    async fn search_detections(&self, run_id: &RunId) -> Result<Vec<DetectionBucket>>;

    /// Human-readable location, for status output
    fn describe(&self) -> String;
}

/// HTTP implementation of DocumentStore
pub struct HttpDocumentStore {
    client: StoreClient,
    index: String,
    detection_index: String,
    max_techniques: usize,
}

impl HttpDocumentStore {
    /// Creates a new store repository
    ///
    /// # Arguments
    /// * `client` - Configured store client
    /// * `index` - Index tag documents are written to
    /// * `detection_index` - Index pattern detection queries run against
    /// * `max_techniques` - Bucket cap for the technique aggregation
    pub fn new(
        client: StoreClient,
        index: impl Into<String>,
        detection_index: impl Into<String>,
        max_techniques: usize,
    ) -> Self {
        Self {
            client,
            index: index.into(),
            detection_index: detection_index.into(),
            max_techniques,
        }
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn put_document(&self, document: &TagDocument) -> Result<String> {
        let response = self
            .client
            .put_document(&self.index, document.run_id(), document)
            .await?;

        tracing::debug!(
            "Indexed document {} into {} ({})",
            response.id,
            response.index,
            response.result.as_deref().unwrap_or("ok")
        );

        Ok(response.id)
    }

    async fn search_detections(&self, run_id: &RunId) -> Result<Vec<DetectionBucket>> {
        let response = self
            .client
            .search_detections(&self.detection_index, run_id, self.max_techniques)
            .await?;

        Ok(response.into_buckets())
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.client.base_url(), self.index)
    }
}
