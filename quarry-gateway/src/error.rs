//! Error types for the gateway crate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors that can occur while serving a request or starting the server.
///
/// Snippet failures are not gateway errors: they are reported as a normal
/// `{"status": "error"}` result with status 200.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The execution backend itself is unavailable.
    #[error("executor error: {0}")]
    Executor(#[from] quarry_executor::ExecutorError),

    /// The request body is malformed or contains invalid values.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request body exceeds the configured limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// An environment setting could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Executor(_) | GatewayError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_status_codes_map_correctly() {
        let resp = GatewayError::InvalidRequest("missing field".to_owned()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = GatewayError::PayloadTooLarge { limit: 16 }.into_response();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn gateway_error_executor_variant_returns_500() {
        let gw_err = GatewayError::from(quarry_executor::ExecutorError::WorkerLost);
        assert_eq!(
            gw_err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Executor errors must map to 500"
        );
    }

    #[test]
    fn gateway_error_display_includes_message() {
        let msg = GatewayError::PayloadTooLarge { limit: 1024 }.to_string();
        assert!(msg.contains("1024"), "Display must include the limit");
    }
}
