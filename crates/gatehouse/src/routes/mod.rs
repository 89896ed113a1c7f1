//! HTTP route handlers for Gatehouse.

use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use warden_common::WardenError;

use crate::state::AppState;

mod challenge;
mod health;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/metrics", get(health::metrics))
        // Challenge lifecycle
        .route("/challenge", post(challenge::start_challenge))
        .route("/challenge/verify", post(challenge::verify_challenge))
        .route("/challenge/resend", post(challenge::resend_challenge))
        .route("/challenge/pending", get(challenge::pending_challenge))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .layer(CorsLayer::permissive())
        // Add shared state
        .with_state(state)
}

/// Adapter from the shared error taxonomy to HTTP responses.
#[derive(Debug)]
pub struct ApiError(WardenError);

impl From<WardenError> for ApiError {
    fn from(err: WardenError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = serde_json::json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        });
        if let WardenError::CooldownActive { retry_after_secs } = &self.0 {
            body["retry_after_secs"] = serde_json::json!(retry_after_secs);
        }

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        (status, Json(body)).into_response()
    }
}
