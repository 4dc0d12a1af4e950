//! Control server exposing the agent tool surface
//!
//! A single `/api/invoke` endpoint accepts `{cmd, args}` requests and
//! routes them through the command layer. Per-session browser servers are
//! separate; this one is for the agent.

use axum::{
    extract::State,
    http::header::{ACCEPT, CONTENT_TYPE},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::commands::{route_command, AppState};

/// Request body for `/api/invoke`
#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    /// Command name (e.g. "push_question", "create_brainstorm")
    pub cmd: String,
    /// Command arguments as a JSON object
    #[serde(default)]
    pub args: Value,
}

/// Response body for `/api/invoke`
#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Version information for the control server
#[derive(Serialize)]
struct VersionInfo {
    version: String,
}

/// Run the control server until interrupted
pub async fn run_server(port: u16, state: AppState) -> Result<(), String> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    let app = Router::new()
        .route("/api/invoke", post(invoke_handler))
        .route("/api/version", get(version_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("127.0.0.1:{}", port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;
    let bound = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {}", e))?;

    log::info!("Control server listening on http://{}", bound);
    log::info!("  POST /api/invoke   - agent tool surface");
    log::info!("  GET  /api/version  - server version info");
    log::info!("  GET  /health       - health check");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("Server error: {}", e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    log::info!("Shutdown signal received, stopping control server");
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Version endpoint
async fn version_handler() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Route an invoke request through the command layer
async fn invoke_handler(
    State(state): State<AppState>,
    Json(req): Json<InvokeRequest>,
) -> Json<InvokeResponse> {
    log::debug!("Invoke command: {} with args: {:?}", req.cmd, req.args);

    match route_command(&req.cmd, req.args, &state).await {
        Ok(data) => Json(InvokeResponse {
            success: true,
            data: Some(data),
            error: None,
        }),
        Err(e) => {
            log::warn!("Command {} failed: {}", req.cmd, e);
            Json(InvokeResponse {
                success: false,
                data: None,
                error: Some(e),
            })
        }
    }
}
