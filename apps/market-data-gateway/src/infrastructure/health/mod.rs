//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, reader status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks upstream readers)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! Admin routes are merged in by the caller, see [`HealthServer::with_routes`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::subscription::IndexStats;
use crate::infrastructure::broadcast::SharedSubscriptionHub;
use crate::infrastructure::ingestion::{ReaderPhase, SessionSnapshot, StreamSupervisor};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Pairs with running readers.
    pub pairs: Vec<String>,
    /// Per-reader status.
    pub sessions: Vec<SessionSnapshot>,
    /// Connection and subscription statistics.
    pub subscriptions: IndexStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some systems degraded but functional.
    Degraded,
    /// Critical systems unavailable.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    hub: SharedSubscriptionHub,
    supervisor: Arc<StreamSupervisor>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        hub: SharedSubscriptionHub,
        supervisor: Arc<StreamSupervisor>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            hub,
            supervisor,
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
    extra_routes: Option<Router>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            extra_routes: None,
            cancel,
        }
    }

    /// Serve additional routes next to the health endpoints.
    #[must_use]
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.extra_routes = Some(routes);
        self
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let mut app = router(self.state);
        if let Some(routes) = self.extra_routes {
            app = app.merge(routes);
        }

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

/// Health, readiness and metrics routes.
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
    if is_ready(&state.supervisor.sessions()) {
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
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let sessions = state.supervisor.sessions();

    HealthResponse {
        status: determine_health_status(&sessions),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        pairs: state.supervisor.active_pairs(),
        sessions,
        subscriptions: state.hub.stats(),
    }
}

fn streaming_count(sessions: &[SessionSnapshot]) -> usize {
    sessions
        .iter()
        .filter(|s| s.phase == ReaderPhase::Streaming)
        .count()
}

fn determine_health_status(sessions: &[SessionSnapshot]) -> HealthStatus {
    let streaming = streaming_count(sessions);

    if streaming == sessions.len() {
        HealthStatus::Healthy
    } else if streaming > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

// Ready if no pair is configured yet or at least one reader is streaming
fn is_ready(sessions: &[SessionSnapshot]) -> bool {
    sessions.is_empty() || streaming_count(sessions) > 0
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

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use futures::StreamExt;
    use tower::ServiceExt;

    use crate::application::ports::{QuoteSource, UpstreamError, UpstreamStream};
    use crate::domain::topic::TopicKind;
    use crate::infrastructure::broadcast::SubscriptionHub;
    use crate::infrastructure::ingestion::{EventRouter, RetryConfig};

    fn session(phase: ReaderPhase) -> SessionSnapshot {
        SessionSnapshot {
            pair: "BTCUSD".to_string(),
            kind: TopicKind::Ticker,
            phase,
            reconnects: 0,
            messages_received: 0,
            last_error: None,
        }
    }

    struct IdleSource;

    #[async_trait]
    impl QuoteSource for IdleSource {
        async fn open_stream(
            &self,
            _pair: &str,
            _kind: TopicKind,
        ) -> Result<UpstreamStream, UpstreamError> {
            Ok(futures::stream::pending().boxed())
        }
    }

    fn state() -> Arc<HealthServerState> {
        let hub = Arc::new(SubscriptionHub::with_defaults());
        let supervisor = Arc::new(StreamSupervisor::new(
            Arc::new(IdleSource),
            Arc::new(EventRouter::new(Arc::clone(&hub))),
            RetryConfig::default(),
            CancellationToken::new(),
        ));
        Arc::new(HealthServerState::new("0.1.0".to_string(), hub, supervisor))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_all_streaming() {
        let sessions = vec![session(ReaderPhase::Streaming); 4];
        assert_eq!(determine_health_status(&sessions), HealthStatus::Healthy);
        assert!(is_ready(&sessions));
    }

    #[test]
    fn determine_status_partial() {
        let sessions = vec![
            session(ReaderPhase::Streaming),
            session(ReaderPhase::Backoff),
        ];
        assert_eq!(determine_health_status(&sessions), HealthStatus::Degraded);
        assert!(is_ready(&sessions));
    }

    #[test]
    fn determine_status_none_streaming() {
        let sessions = vec![
            session(ReaderPhase::Connecting),
            session(ReaderPhase::Backoff),
        ];
        assert_eq!(determine_health_status(&sessions), HealthStatus::Unhealthy);
        assert!(!is_ready(&sessions));
    }

    #[test]
    fn no_pairs_is_healthy_and_ready() {
        assert_eq!(determine_health_status(&[]), HealthStatus::Healthy);
        assert!(is_ready(&[]));
    }

    #[tokio::test]
    async fn health_endpoint_reports_json() {
        let response = router(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "0.1.0");
        assert_eq!(json["subscriptions"]["connections"], 0);
    }

    #[tokio::test]
    async fn liveness_endpoint_is_ok() {
        let response = router(state())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
