//! Streamable HTTP transport: one JSON-RPC message per `POST /mcp`.

use crate::server::{JsonRpcRequest, JsonRpcResponse, McpServer};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn build_router(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/mcp", post(handle_rpc))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Binds `bind_addr` and serves until Ctrl-C.
pub async fn serve(server: Arc<McpServer>, bind_addr: &str) -> Result<()> {
    let app = build_router(server);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("MCP server listening on http://{}/mcp", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("MCP server interrupted, shutting down"),
        Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
    }
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_rpc(State(server): State<Arc<McpServer>>, body: Bytes) -> Response {
    let req = match parse_request(&body) {
        Ok(req) => req,
        Err(response) => return (StatusCode::BAD_REQUEST, Json(response)).into_response(),
    };

    match server.handle_request(&req).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Unparseable bytes are a parse error (-32700); JSON that is not a request
/// object is an invalid request (-32600).
fn parse_request(body: &[u8]) -> std::result::Result<JsonRpcRequest, JsonRpcResponse> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        warn!("Failed to parse JSON-RPC body: {}", e);
        JsonRpcResponse::failure(None, -32700, format!("Parse error: {}", e))
    })?;

    let id = value.get("id").cloned();
    serde_json::from_value(value).map_err(|e| {
        warn!("Invalid JSON-RPC request: {}", e);
        JsonRpcResponse::failure(id, -32600, format!("Invalid Request: {}", e))
    })
}
