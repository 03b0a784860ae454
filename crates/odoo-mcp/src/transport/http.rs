//! Streamable HTTP transport.
//!
//! `POST /mcp` carries the JSON-RPC exchange; `GET /health` reports
//! liveness for orchestrators.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::handlers::LogContext;
use crate::protocol::JsonRpcRequest;
use crate::server::OdooMcpServer;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;

pub async fn run(server: Arc<OdooMcpServer>) -> anyhow::Result<()> {
    let host = server
        .config()
        .host
        .clone()
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.config().port.unwrap_or(DEFAULT_PORT);
    let addr = format!("{host}:{port}");

    let app = Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/health", get(handle_health))
        .with_state(server);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "streamable-http transport listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("interrupt received, shutting down");
        })
        .await?;

    Ok(())
}

async fn handle_mcp(
    State(server): State<Arc<OdooMcpServer>>,
    Json(request): Json<JsonRpcRequest>,
) -> Response {
    // No notification back-channel over plain HTTP; log sinks fall back to
    // tracing only.
    let ctx = LogContext::disabled();
    match server.handle_request(request, &ctx).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn handle_health(State(server): State<Arc<OdooMcpServer>>) -> Response {
    Json(server.health()).into_response()
}
