//! Liveness probe
//!
//! Answers as long as the HTTP listener is up. Store and engine health are
//! reported by `/api/status` instead, so an unreachable store never makes
//! the service look dead.

use axum::http::StatusCode;

/// GET /health
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check_answers_ok() {
        assert_eq!(health_check().await, (StatusCode::OK, "OK"));
    }
}
