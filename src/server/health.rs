//! Health check endpoint for liveness probes.
//!
//! Returns 200 OK while the process is up. The endpoint deliberately stays
//! alive during draining so orchestrators don't kill the process before the
//! workers finish flushing.

use axum::http::StatusCode;

/// Health check handler.
///
/// Returns 200 OK with the text "OK".
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_returns_200_ok() {
        let (status, body) = health_handler().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
