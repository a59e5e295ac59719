//! Purple HTTP Clients
//!
//! Type-safe HTTP clients for the two remote systems the pipeline talks to:
//!
//! - [`StoreClient`]: the Elasticsearch-compatible search-index store
//!   (tag document writes, detection queries, cluster info)
//! - [`EngineClient`]: the emulation engine's operation read API
//!
//! # Example
//!
//! ```no_run
//! use purple_client::{StoreClient, StoreSettings};
//!
//! # async fn example() -> purple_client::Result<()> {
//! let store = StoreClient::from_settings(&StoreSettings::new("http://localhost:9200"))?;
//! let info = store.info().await?;
//! println!("cluster: {}", info["cluster_name"]);
//! # Ok(())
//! # }
//! ```

mod engine;
pub mod error;
mod store;

// Re-export commonly used types
pub use engine::EngineClient;
pub use error::{ClientError, Result};
pub use store::{StoreAuth, StoreClient, StoreSettings, detection_query};

use serde::de::DeserializeOwned;

// =============================================================================
// Response Handlers
// =============================================================================

/// Checks the status code and deserializes the JSON body
///
/// Non-2xx responses become [`ClientError::ApiError`] carrying the body text.
pub(crate) async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Normalizes a base URL so paths can be appended with `/`
pub(crate) fn trim_base_url(base_url: impl Into<String>) -> String {
    base_url.into().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_base_url() {
        assert_eq!(trim_base_url("http://localhost:9200/"), "http://localhost:9200");
        assert_eq!(trim_base_url("http://localhost:9200"), "http://localhost:9200");
    }
}
