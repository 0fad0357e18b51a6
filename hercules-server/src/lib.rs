//! Hercules Server
//!
//! HTTP front end for the obfuscation pipeline. Pipeline calls block on
//! external processes, so every one of them runs on the blocking pool.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hercules_core::{FailureKind, ObfuscationOrchestrator, Preset};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let settings = hercules_core::ServerSettings::default();
        Self {
            port: settings.port,
            host: settings.host,
        }
    }
}

impl From<&hercules_core::ServerSettings> for ServerConfig {
    fn from(settings: &hercules_core::ServerSettings) -> Self {
        Self {
            port: settings.port,
            host: settings.host.clone(),
        }
    }
}

/// Shared application state
pub struct AppState {
    /// Pipeline shared by all requests
    pub orchestrator: Arc<ObfuscationOrchestrator>,

    /// Flipped to `true` by `/shutdown`
    pub shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(orchestrator: ObfuscationOrchestrator) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            orchestrator: Arc::new(orchestrator),
            shutdown,
        })
    }
}

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/methods", get(handle_methods))
        .route("/resolve", post(handle_resolve))
        .route("/validate", post(handle_validate))
        .route("/obfuscate", post(handle_obfuscate))
        .route("/shutdown", post(handle_shutdown))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Whole scripts travel in request bodies
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
}

/// Health check endpoint
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MethodsResponse<'a> {
    methods: &'a [hercules_core::Method],
    max_bitkey: i64,
    default_bitkey: i64,
    presets: Vec<&'static str>,
}

/// List the method catalog
async fn handle_methods(State(state): State<Arc<AppState>>) -> Response {
    let registry = state.orchestrator.registry();
    Json(MethodsResponse {
        methods: registry.methods(),
        max_bitkey: registry.max_bitkey(),
        default_bitkey: registry.default_bitkey(),
        presets: Preset::ALL.iter().map(|p| p.as_str()).collect(),
    })
    .into_response()
}

/// Resolve request
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub bitkey: i64,
}

async fn handle_resolve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResolveRequest>,
) -> Response {
    match state.orchestrator.selector().resolve(req.bitkey) {
        Ok(methods) => Json(serde_json::json!({
            "bitkey": req.bitkey,
            "methods": methods,
        }))
        .into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// Syntax check request
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub source: String,
}

async fn handle_validate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Response {
    let orchestrator = state.orchestrator.clone();
    let result =
        tokio::task::spawn_blocking(move || orchestrator.validator().validate_source(&req.source))
            .await;

    match result {
        Ok(Ok(validation)) => Json(validation).into_response(),
        Ok(Err(e)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Obfuscation request
#[derive(Debug, Deserialize)]
pub struct ObfuscateRequest {
    /// Lua source to transform
    pub source: String,
    /// Selected methods
    pub bitkey: i64,
    /// Optional intensity preset
    #[serde(default)]
    pub preset: Option<Preset>,
}

async fn handle_obfuscate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ObfuscateRequest>,
) -> Response {
    let orchestrator = state.orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || {
        orchestrator.obfuscate_source(&req.source, req.bitkey, req.preset)
    })
    .await;

    match result {
        Ok(outcome) => {
            let status = match outcome.result.failure {
                Some(FailureKind::InvalidBitkey)
                | Some(FailureKind::PreObfuscationSyntaxRejected) => StatusCode::BAD_REQUEST,
                _ => StatusCode::OK,
            };
            (status, Json(outcome)).into_response()
        }
        Err(e) => {
            tracing::error!("Obfuscation task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Ask the server to stop accepting connections
async fn handle_shutdown(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested");
    state.shutdown.send_replace(true);
    StatusCode::OK
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Run the HTTP server until `/shutdown` is called
pub async fn run_server(config: ServerConfig, orchestrator: ObfuscationOrchestrator) -> anyhow::Result<()> {
    let state = AppState::new(orchestrator);
    let mut shutdown_rx = state.shutdown.subscribe();
    let router = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Hercules server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await?;

    tracing::info!("Hercules server stopped");
    Ok(())
}
