//! Axum route handlers for the Quarry gateway API.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use quarry_core::Outcome;
use quarry_executor::{ExecutionBackend, Pipeline, ThreadBackend};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::error::GatewayError;

// ── Shared state ─────────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline<ThreadBackend>>,
    body_limit: usize,
}

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub code: String,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the application router for `config`.
pub fn create_router(config: &GatewayConfig) -> Router {
    let pipeline = Pipeline::new(ThreadBackend::with_max_workers(config.max_workers))
        .with_capabilities(config.capabilities.clone())
        .with_limits(config.limits.clone());
    let state = AppState {
        pipeline: Arc::new(pipeline),
        body_limit: config.body_limit,
    };
    Router::new()
        .route("/v1/execute", post(execute_code))
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `GET /health`: liveness probe that also starts a worker thread.
///
/// # Errors
/// Returns [`GatewayError::Executor`] if no worker can be started.
async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    state.pipeline.backend().health_check().await?;
    Ok((StatusCode::OK, Json(serde_json::json!({"status": "ok"}))))
}

/// `POST /v1/execute`: run a snippet and return its outcome.
///
/// Snippet failures are results, not transport errors, so both the success
/// and the error shape are returned with status 200.
///
/// # Errors
/// Returns [`GatewayError::PayloadTooLarge`] for bodies over the limit and
/// [`GatewayError::InvalidRequest`] for bodies that are not `{"code": "..."}`.
async fn execute_code(
    State(state): State<AppState>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Result<Json<Outcome>, GatewayError> {
    let Json(body) = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            GatewayError::PayloadTooLarge {
                limit: state.body_limit,
            }
        } else {
            GatewayError::InvalidRequest(rejection.body_text())
        }
    })?;
    tracing::debug!(bytes = body.code.len(), "execute request");
    Ok(Json(state.pipeline.run(&body.code).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use tower::ServiceExt;

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = match app.oneshot(req).await {
            Ok(r) => r,
            Err(e) => panic!("handler error: {e}"),
        };
        let status = resp.status();
        let bytes = match axum::body::to_bytes(resp.into_body(), 1 << 20).await {
            Ok(b) => b,
            Err(e) => panic!("failed to read body: {e}"),
        };
        let body = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => panic!("invalid JSON: {e}"),
        };
        (status, body)
    }

    fn execute_request(body: impl Into<Body>) -> Request<Body> {
        match Request::builder()
            .method("POST")
            .uri("/v1/execute")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
        {
            Ok(r) => r,
            Err(e) => panic!("failed to build request: {e}"),
        }
    }

    fn code(source: &str) -> String {
        serde_json::json!({"code": source}).to_string()
    }

    #[tokio::test]
    async fn health_response_format_returns_ok_with_status_field() {
        let app = create_router(&GatewayConfig::default());
        let req = match Request::builder().uri("/health").body(Body::empty()) {
            Ok(r) => r,
            Err(e) => panic!("failed to build request: {e}"),
        };
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn execute_returns_the_rendered_value() {
        let app = create_router(&GatewayConfig::default());
        let (status, body) = send(app, execute_request(code("x = [1, 2]\nx"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"status": "success", "result": {"type": "list", "value": "[1, 2]"}})
        );
    }

    #[tokio::test]
    async fn rejected_snippets_are_ok_responses_with_error_status() {
        let app = create_router(&GatewayConfig::default());
        let (status, body) = send(app, execute_request(code("import os"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert!(body["message"]
            .as_str()
            .is_some_and(|m| m.starts_with("UnsafeCode: ")));
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        let app = create_router(&GatewayConfig::default());
        let (status, body) = send(app, execute_request("{\"source\": 1}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some_and(|m| m.starts_with("invalid request")));
    }

    #[tokio::test]
    async fn oversize_bodies_are_rejected_with_413() {
        let mut config = GatewayConfig::default();
        config.body_limit = 64;
        let app = create_router(&config);
        let (status, body) = send(app, execute_request(code(&"x = 1\n".repeat(100)))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "request body exceeds 64 bytes");
    }
}
