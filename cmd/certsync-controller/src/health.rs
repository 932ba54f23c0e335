//! Health check endpoints for certsync-controller
//!
//! Provides HTTP endpoints for:
//! - /healthz - Liveness check
//! - /readyz - Readiness check (ready once the serving certificate exists)

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Shared state for health endpoints
#[derive(Default)]
pub struct HealthState {
    certificates_ready: RwLock<bool>,
}

impl HealthState {
    /// Record that the serving certificate has been written locally.
    pub async fn mark_ready(&self) {
        *self.certificates_ready.write().await = true;
    }

    pub async fn is_ready(&self) -> bool {
        *self.certificates_ready.read().await
    }
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn readyz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_ready().await {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ready".to_string(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "waiting for certificates".to_string(),
            }),
        )
    }
}

/// Create health check router
pub fn create_health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}
