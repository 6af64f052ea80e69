// Main entry point for the image SEO metadata workflow

use seo_workflow::{
    core::{types::*, Config},
    orchestration::AnalysisOrchestrator,
    services::EndpointFactory,
    storage::{ImageStore, InMemoryImageStore},
    utils::Metrics,
};

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<AnalysisOrchestrator>,
    store: Arc<InMemoryImageStore>,
    factory: Arc<EndpointFactory>,
    metrics: Metrics,
}

/// Body of `POST /sessions/{id}/analyze`
#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    images: Vec<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    preset: Option<Preset>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "seo_workflow={},tower_http=warn",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== IMAGE SEO METADATA WORKFLOW ===");
    info!(
        "Config: mode={} timeout={}ms retries={} concurrency={}",
        config.endpoint.mode,
        config.endpoint.timeout_ms,
        config.endpoint.max_retries,
        config.analysis_concurrency()
    );

    let metrics = Metrics::new();

    // Misconfiguration aborts startup before any request is served
    let factory = Arc::new(EndpointFactory::new(config.endpoint.clone(), Some(metrics.clone())));
    let endpoint = factory
        .get_or_init()
        .context("Failed to initialize vision endpoint")?;

    let store = Arc::new(InMemoryImageStore::new());
    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        endpoint,
        store.clone(),
        metrics.clone(),
        config.analysis_concurrency(),
    ));

    let state = AppState {
        orchestrator,
        store,
        factory,
        metrics,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/sessions/:session_id/analyze", post(analyze_session))
        .route("/sessions/:session_id/images", get(list_images))
        .with_state(state)
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /                        - Root endpoint");
    info!("  GET  /health                  - Model endpoint health");
    info!("  GET  /metrics                 - Prometheus metrics");
    info!("  GET  /stats                   - Detailed statistics");
    info!("  POST /sessions/:id/analyze    - Analyze a batch of images");
    info!("  GET  /sessions/:id/images     - Image statuses for a session");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> &'static str {
    "Image SEO Metadata Workflow"
}

/// Health of the active model endpoint
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let endpoint = match state.factory.active() {
        Some(endpoint) => endpoint,
        None => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unhealthy",
                    "info": "endpoint not initialized",
                })),
            )
        }
    };

    let report = endpoint.health().await;
    let code = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(serde_json::json!({
            "status": if report.ok { "healthy" } else { "unhealthy" },
            "endpoint": endpoint.name(),
            "info": report.info,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

/// Analyze a batch of images
///
/// # Request Format:
/// `{"images": ["<path | data URL | base64>", ...], "prompt"?: string, "preset"?: {...}}`
///
/// # Response:
/// BatchReport JSON; per-image failures are reported inside it
async fn analyze_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<BatchReport>, (StatusCode, String)> {
    if request.images.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No images provided".to_string()));
    }

    info!(
        "Received analyze request for session {} ({} images)",
        session_id,
        request.images.len()
    );

    let submissions = request
        .images
        .into_iter()
        .map(|file_reference| ImageSubmission { file_reference })
        .collect();

    let report = state
        .orchestrator
        .submit_batch(&session_id, submissions, request.prompt, request.preset)
        .await
        .map_err(|e| {
            error!("Batch processing failed: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Processing failed: {}", e),
            )
        })?;

    Ok(Json(report))
}

/// Current image records for a session
async fn list_images(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<ImageRecord>>, (StatusCode, String)> {
    state
        .store
        .get_images(&session_id)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
