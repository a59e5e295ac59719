//! Search-index store client
//!
//! Elasticsearch-compatible endpoints used by the pipeline:
//! - `PUT /{index}/_doc/{id}` to write tag documents
//! - `POST /{index}/_search` to aggregate detections per technique
//! - `GET /` for connectivity checks

use purple_core::domain::run::RunId;
use purple_core::dto::search::{IndexResponse, SearchResponse};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::{handle_response, trim_base_url};

/// Credentials presented to the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StoreAuth {
    #[default]
    None,
    /// `Authorization: ApiKey <key>`
    ApiKey(String),
    Basic {
        user: String,
        password: String,
    },
}

impl StoreAuth {
    /// Picks API key auth when a key is set, otherwise basic auth when both
    /// user and password are set
    pub fn from_parts(api_key: &str, user: &str, password: &str) -> Self {
        if !api_key.is_empty() {
            StoreAuth::ApiKey(api_key.to_string())
        } else if !user.is_empty() && !password.is_empty() {
            StoreAuth::Basic {
                user: user.to_string(),
                password: password.to_string(),
            }
        } else {
            StoreAuth::None
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            StoreAuth::None => request,
            StoreAuth::ApiKey(key) => request.header("Authorization", format!("ApiKey {}", key)),
            StoreAuth::Basic { user, password } => request.basic_auth(user, Some(password)),
        }
    }
}

/// Connection settings for [`StoreClient`]
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub url: String,
    pub auth: StoreAuth,
    /// Verify the server certificate; only disable for lab clusters
    pub verify_tls: bool,
    pub connect_timeout: Duration,
    /// Per-request ceiling enforced by the HTTP client
    pub request_timeout: Duration,
}

impl StoreSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: StoreAuth::None,
            verify_tls: true,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the search-index store
#[derive(Debug, Clone)]
pub struct StoreClient {
    base_url: String,
    client: Client,
    auth: StoreAuth,
}

impl StoreClient {
    /// Builds a client with timeouts and TLS policy from `settings`
    pub fn from_settings(settings: &StoreSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;

        Ok(Self::with_client(
            settings.url.clone(),
            client,
            settings.auth.clone(),
        ))
    }

    /// Create a store client with a pre-configured reqwest client
    pub fn with_client(base_url: impl Into<String>, client: Client, auth: StoreAuth) -> Self {
        Self {
            base_url: trim_base_url(base_url),
            client,
            auth,
        }
    }

    /// Get the base URL of the store
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Writes a document under an explicit id
    ///
    /// Writing the same id again replaces the previous version, so repeated
    /// deliveries of the same logical document are harmless.
    pub async fn put_document<T: Serialize + ?Sized>(
        &self,
        index: &str,
        id: &str,
        document: &T,
    ) -> Result<IndexResponse> {
        let url = format!("{}/{}/_doc/{}", self.base_url, index, id);
        let request = self.auth.apply(self.client.put(&url)).json(document);
        let response = request.send().await?;

        handle_response(response).await
    }

    /// Aggregates detection evidence for one run, bucketed by technique
    pub async fn search_detections(
        &self,
        index: &str,
        run_id: &RunId,
        max_techniques: usize,
    ) -> Result<SearchResponse> {
        let url = format!("{}/{}/_search", self.base_url, index);
        let body = detection_query(run_id, max_techniques);
        let request = self.auth.apply(self.client.post(&url)).json(&body);
        let response = request.send().await?;

        handle_response(response).await
    }

    /// Fetches cluster information (used as a connectivity probe)
    pub async fn info(&self) -> Result<serde_json::Value> {
        let request = self.auth.apply(self.client.get(&self.base_url));
        let response = request.send().await?;

        handle_response(response).await
    }
}

/// Builds the detection aggregation query for a run
///
/// Filters on `purple.operation_id` and buckets by `purple.technique`, with
/// detection status and fired rule names as sub-aggregations.
pub fn detection_query(run_id: &RunId, max_techniques: usize) -> serde_json::Value {
    serde_json::json!({
        "size": 0,
        "query": {
            "bool": {
                "filter": [
                    { "term": { "purple.operation_id": run_id.as_str() } },
                    { "exists": { "field": "purple.technique" } }
                ]
            }
        },
        "aggs": {
            "by_technique": {
                "terms": { "field": "purple.technique", "size": max_techniques },
                "aggs": {
                    "detection_status": {
                        "terms": { "field": "purple.detection_status", "size": 10 }
                    },
                    "rule_names": {
                        "terms": { "field": "rule.name", "size": 3 }
                    }
                }
            }
        }
    })
}
