//! HTTP control surface: start, stop, status, health and Prometheus metrics

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::ServiceSettings;
use crate::consumer::{PipelineControl, PipelineStatus};

/// Maximum request body size (64KB); no endpoint takes a body
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Health endpoint payload
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests
    pub status: String,
    /// Crate version
    pub version: String,
    /// Seconds since the service was created
    pub uptime_seconds: u64,
    /// Whether shutdown has begun
    pub shutting_down: bool,
}

/// Start/stop/status handlers over a shared [`PipelineControl`]
#[derive(Clone)]
pub struct ControlService {
    control: Arc<PipelineControl>,
    start_time: Instant,
    request_timeout: Duration,
    max_concurrent_requests: usize,
}

impl ControlService {
    /// Create the service with default limits
    pub fn new(control: Arc<PipelineControl>) -> Self {
        Self::with_settings(control, &ServiceSettings::default())
    }

    /// Create the service with configured limits
    pub fn with_settings(control: Arc<PipelineControl>, settings: &ServiceSettings) -> Self {
        Self {
            control,
            start_time: Instant::now(),
            request_timeout: settings.request_timeout(),
            max_concurrent_requests: settings.max_concurrent_requests.max(1),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let app = Router::new()
            .route("/start", post(Self::start_handler))
            .route("/stop", post(Self::stop_handler))
            .route("/status", get(Self::status_handler))
            .route("/health", get(Self::health_handler))
            .route("/metrics", get(Self::metrics_handler))
            .with_state(self.clone());

        app.layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(ConcurrencyLimitLayer::new(self.max_concurrent_requests))
            .layer(TraceLayer::new_for_http())
    }

    async fn start_handler(State(service): State<ControlService>) -> impl IntoResponse {
        if service.control.is_shutting_down() {
            return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down");
        }
        service.control.start();
        (StatusCode::OK, "Pipeline started")
    }

    async fn stop_handler(State(service): State<ControlService>) -> &'static str {
        service.control.stop();
        "Pipeline stopped"
    }

    async fn status_handler(State(service): State<ControlService>) -> Json<PipelineStatus> {
        Json(service.control.status())
    }

    async fn health_handler(State(service): State<ControlService>) -> Json<HealthResponse> {
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: service.start_time.elapsed().as_secs(),
            shutting_down: service.control.is_shutting_down(),
        })
    }

    async fn metrics_handler(State(service): State<ControlService>) -> impl IntoResponse {
        (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            service.control.metrics().encode(),
        )
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Control service listening on {}", listener.local_addr()?);

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("Server error: {}", e);
            return Err(e);
        }

        info!("Control service stopped");
        Ok(())
    }
}
