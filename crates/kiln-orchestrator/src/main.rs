//! Kiln Orchestrator - Kubernetes Build Environment Service
//!
//! This is the main entry point for the orchestrator service.
//! It stands up and tears down build pods and runs scripts inside them.
//!
//! # HTTP Endpoints
//!
//! ## Health & Readiness
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check
//!
//! ## Build Environments
//! - `POST /v1/builds` - Initialize a build environment
//! - `POST /v1/cleanup` - Delete a build environment
//! - `POST /v1/exec` - Run a script inside a build container

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use kiln_core::{BuildEnvironmentRequest, CleanupRequest, ExecRequest, LogSink};
use kiln_orchestrator::sink::DEFAULT_SINK_CAPACITY;
use kiln_orchestrator::{
    BuildEnvironmentOrchestrator, CleanupOrchestrator, ClusterClientFactory, CommandExecutor,
    HttpCredentialBroker, HttpLogSink, KubeClientFactory, OrchestratorConfig, OrchestratorError,
    TracingLogSink,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    builds: Arc<BuildEnvironmentOrchestrator>,
    cleanup: Arc<CleanupOrchestrator>,
    executor: Arc<CommandExecutor>,
    factory: Arc<dyn ClusterClientFactory>,
    log_service_url: Option<String>,
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "kiln-orchestrator",
    })
}

async fn ready_handler(State(_state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, "ready")
}

// ============================================================================
// Build Environment Endpoints
// ============================================================================

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

fn error_response(e: &OrchestratorError) -> axum::response::Response {
    let code = e.http_status_code();
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorResponse::new(e.to_string(), code)),
    )
        .into_response()
}

impl AppState {
    fn sink_for(&self, request: &BuildEnvironmentRequest) -> Arc<dyn LogSink> {
        let (Some(url), Some(key)) = (&self.log_service_url, &request.log_key) else {
            return Arc::new(TracingLogSink);
        };
        match HttpLogSink::spawn(url, key.clone(), DEFAULT_SINK_CAPACITY) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                tracing::warn!(log_key = %key, error = %e, "Falling back to local event logging");
                Arc::new(TracingLogSink)
            }
        }
    }
}

/// Initialize a build environment.
///
/// POST /v1/builds
async fn build_handler(
    State(state): State<AppState>,
    Json(req): Json<BuildEnvironmentRequest>,
) -> impl IntoResponse {
    let sink = state.sink_for(&req);
    let result = state.builds.initialize(&req, sink).await;
    tracing::info!(
        pod_name = %req.pod.name,
        namespace = %req.pod.namespace,
        status = ?result.status,
        "Handled build environment request"
    );
    Json(result)
}

/// Delete a build environment.
///
/// POST /v1/cleanup
async fn cleanup_handler(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> impl IntoResponse {
    let result = state.cleanup.cleanup(&req).await;
    tracing::info!(
        namespace = %req.namespace,
        pods = req.pod_names.len(),
        status = ?result.status,
        "Handled cleanup request"
    );
    Json(result)
}

/// Run a script inside a build container.
///
/// POST /v1/exec
async fn exec_handler(
    State(state): State<AppState>,
    Json(req): Json<ExecRequest>,
) -> impl IntoResponse {
    match state.executor.resolve_and_run(state.factory.as_ref(), &req).await {
        Ok(result) => {
            tracing::info!(
                pod_name = %req.pod_name,
                container_name = %req.container_name,
                status = ?result.status,
                "Handled exec request"
            );
            Json(result).into_response()
        }
        Err(e) => {
            tracing::warn!(pod_name = %req.pod_name, error = %e, "Exec request aborted");
            error_response(&e)
        }
    }
}

// ============================================================================
// Router
// ============================================================================

fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & readiness
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // Build environments
        .route("/v1/builds", post(build_handler))
        .route("/v1/cleanup", post(cleanup_handler))
        .route("/v1/exec", post(exec_handler))
        .with_state(state)
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Received shutdown signal");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kiln=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Kiln Orchestrator");

    // Load configuration from environment
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let broker_url = std::env::var("CREDENTIAL_BROKER_URL")
        .unwrap_or_else(|_| "http://credential-broker:8080".to_string());
    let log_service_url = std::env::var("LOG_SERVICE_URL").ok();
    let config = OrchestratorConfig::from_env();

    tracing::info!(
        broker_url = %broker_url,
        log_service_url = ?log_service_url,
        poll_interval_secs = config.poll_interval_secs,
        verify_connectivity = config.verify_connectivity,
        "Loaded orchestrator configuration"
    );

    let cancel = CancellationToken::new();
    let broker = Arc::new(HttpCredentialBroker::new(broker_url)?);
    let factory: Arc<dyn ClusterClientFactory> =
        Arc::new(KubeClientFactory::new(broker.clone(), config.clone()));

    let builds = BuildEnvironmentOrchestrator::new(
        Arc::clone(&factory),
        broker.clone(),
        broker,
        config.clone(),
    )
    .with_cancellation(cancel.clone());

    // Create app state
    let state = AppState {
        builds: Arc::new(builds),
        cleanup: Arc::new(CleanupOrchestrator::new(Arc::clone(&factory))),
        executor: Arc::new(CommandExecutor::new(config, cancel.clone())),
        factory,
        log_service_url,
    };

    // Create router
    let app = create_router(state);

    // Start server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
