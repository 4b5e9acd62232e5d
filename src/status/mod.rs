//! Status endpoints
//!
//! Read-only HTTP surface for process supervisors and scrapers:
//!
//! - `GET /health/live`  - 200 while the process is up
//! - `GET /health/ready` - 200 while the discovery service is running
//! - `GET /metrics`      - Prometheus text exposition
//!
//! ```yaml
//! readinessProbe:
//!   httpGet:
//!     path: /health/ready
//!     port: 9092
//! ```

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::discovery::{DiscoveryService, MembershipStats};
use crate::metrics;

/// Status server failures
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub running: bool,
    pub backend: &'static str,
    pub members: MembershipStats,
    pub timestamp: String,
}

// ============================================================================
// Server
// ============================================================================

/// Shared handler state
#[derive(Clone)]
pub struct StatusState {
    pub service: Arc<DiscoveryService>,
    pub start_time: Instant,
}

/// HTTP server exposing health and metrics
pub struct StatusServer {
    bind_address: SocketAddr,
    state: StatusState,
}

impl StatusServer {
    pub fn new(bind_address: SocketAddr, service: Arc<DiscoveryService>) -> Self {
        Self {
            bind_address,
            state: StatusState {
                service,
                start_time: Instant::now(),
            },
        }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health/live", get(liveness_probe))
            .route("/health/ready", get(readiness_probe))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until `shutdown_signal`
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), StatusError> {
        let listener = TcpListener::bind(self.bind_address)
            .await
            .map_err(|source| StatusError::Bind {
                addr: self.bind_address,
                source,
            })?;
        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), StatusError> {
        let addr = listener.local_addr().unwrap_or(self.bind_address);
        tracing::info!(%addr, "Status server listening");

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(StatusError::Serve)?;

        tracing::info!("Status server shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn liveness_probe(State(state): State<StatusState>) -> impl IntoResponse {
    let response = LivenessResponse {
        status: HealthStatus::Healthy,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

async fn readiness_probe(State(state): State<StatusState>) -> impl IntoResponse {
    let running = state.service.is_running();
    let status = if running {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    let response = ReadinessResponse {
        status,
        running,
        backend: state.service.backend_name(),
        members: state.service.stats().await,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (status.status_code(), Json(response))
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            format!("failed to encode metrics: {e}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::discovery::StaticBackend;

    async fn spawn_server(service: Arc<DiscoveryService>) -> (String, tokio::sync::oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = StatusServer::new(addr, service);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });
        (format!("http://{addr}"), tx)
    }

    fn service() -> Arc<DiscoveryService> {
        let backend = StaticBackend::from_addresses(&["10.0.0.5:9091".to_string()], "_pifleet._tcp")
            .unwrap();
        Arc::new(DiscoveryService::new(DiscoveryConfig::default(), Arc::new(backend)).unwrap())
    }

    #[tokio::test]
    async fn test_liveness_always_ok() {
        let (base, _stop) = spawn_server(service()).await;
        let response = reqwest::get(format!("{base}/health/live")).await.unwrap();
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_readiness_follows_service_state() {
        let service = service();
        let (base, _stop) = spawn_server(service.clone()).await;

        let response = reqwest::get(format!("{base}/health/ready")).await.unwrap();
        assert_eq!(response.status(), 503);

        service.start().await.unwrap();
        service.run_cycle_once().await;

        let response = reqwest::get(format!("{base}/health/ready")).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["running"], true);
        assert_eq!(body["backend"], "static");
        assert_eq!(body["members"]["pinned"], 1);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let _ = metrics::init_metrics();
        let (base, _stop) = spawn_server(service()).await;

        let response = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(response.status(), 200);
        let body = response.text().await.unwrap();
        assert!(body.contains("pifleet_"));
    }
}
