//! Emulation engine client
//!
//! Read-only access to the engine's operation API.

use purple_core::domain::run::{Run, RunId};
use purple_core::dto::engine::OperationDto;
use reqwest::Client;
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::{handle_response, trim_base_url};

/// HTTP client for the emulation engine
#[derive(Debug, Clone)]
pub struct EngineClient {
    base_url: String,
    client: Client,
    /// Value of the engine's `KEY` header; empty disables the header
    api_key: String,
}

impl EngineClient {
    /// Create a new engine client
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the engine (e.g., "http://localhost:8888")
    /// * `api_key` - API key sent in the `KEY` header
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            base_url: trim_base_url(base_url),
            client,
            api_key: api_key.into(),
        })
    }

    /// Get the base URL of the engine
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches the current snapshot of a run
    ///
    /// # Returns
    /// The run, or [`ClientError::NotFound`] if the engine no longer knows it
    pub async fn get_run(&self, run_id: &RunId) -> Result<Run> {
        let url = format!("{}/api/v2/operations/{}", self.base_url, run_id);

        let mut request = self.client.get(&url);
        if !self.api_key.is_empty() {
            request = request.header("KEY", &self.api_key);
        }
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(format!("run {}", run_id)));
        }

        let operation: OperationDto = handle_response(response).await?;
        tracing::debug!(
            "Fetched run {} ({} links)",
            operation.id,
            operation.chain.len()
        );

        Ok(operation.into())
    }
}
