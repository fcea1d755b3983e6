//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, ingestion status reporting, and
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! Readiness: a historical run is ready while it is pulling pages; a live run
//! additionally needs the stream socket to be open.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{IngestionPhase, IngestionStatus, StatusSnapshot};
use crate::domain::mode::IngestionMode;
use crate::infrastructure::binance::{StreamStatus, StreamStatusSnapshot};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Ingestion loop counters.
    pub ingestion: StatusSnapshot,
    /// Stream connection counters (live mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamStatusSnapshot>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Ingesting normally.
    Healthy,
    /// Running but a live stream is disconnected.
    Degraded,
    /// The run failed.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    ingestion: Arc<IngestionStatus>,
    stream: Option<Arc<StreamStatus>>,
}

impl HealthServerState {
    /// Create new health server state.
    ///
    /// `stream` is `None` in historical mode.
    #[must_use]
    pub fn new(
        version: String,
        ingestion: Arc<IngestionStatus>,
        stream: Option<Arc<StreamStatus>>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            ingestion,
            stream,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by [`HealthServer`].
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let ingestion = state.ingestion.snapshot();
    let stream = state.stream.as_ref().map(|s| s.snapshot());

    if is_ready(&ingestion, stream.as_ref()) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let ingestion = state.ingestion.snapshot();
    let stream = state.stream.as_ref().map(|s| s.snapshot());

    HealthResponse {
        status: determine_health_status(&ingestion, stream.as_ref()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        ingestion,
        stream,
    }
}

fn determine_health_status(
    ingestion: &StatusSnapshot,
    stream: Option<&StreamStatusSnapshot>,
) -> HealthStatus {
    if ingestion.phase == IngestionPhase::Failed {
        return HealthStatus::Unhealthy;
    }
    match (ingestion.mode, stream) {
        (IngestionMode::Live, Some(s)) if !s.connected => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    }
}

fn is_ready(ingestion: &StatusSnapshot, stream: Option<&StreamStatusSnapshot>) -> bool {
    if ingestion.phase != IngestionPhase::Running {
        return false;
    }
    match ingestion.mode {
        IngestionMode::Historical => true,
        IngestionMode::Live => stream.is_some_and(|s| s.connected),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
