//! Stdio transport: line-delimited JSON over stdin/stdout.
//!
//! Stdout is the wire; diagnostics must go to stderr (the tracing
//! subscriber is configured accordingly in `main`). Log-context
//! notifications are flushed before each response so clients see progress
//! in order.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::handlers::LogContext;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::server::OdooMcpServer;

pub async fn run(server: Arc<OdooMcpServer>) -> anyhow::Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let ctx = LogContext::new(tx);

    let mut line = String::new();
    loop {
        line.clear();

        let read = tokio::select! {
            read = reader.read_line(&mut line) => read?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
        };
        if read == 0 {
            tracing::info!("stdin closed, shutting down");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                let response = JsonRpcResponse::error(
                    RequestId::Number(0),
                    JsonRpcError::parse_error(format!("invalid JSON-RPC request: {e}")),
                );
                write_message(&mut stdout, &response).await?;
                continue;
            }
        };

        let response = server.handle_request(request, &ctx).await;

        // Ship buffered notifications ahead of the response.
        while let Ok(notification) = rx.try_recv() {
            write_message(&mut stdout, &notification).await?;
        }
        if let Some(response) = response {
            write_message(&mut stdout, &response).await?;
        }
    }

    Ok(())
}

async fn write_message<T: Serialize>(
    stdout: &mut tokio::io::Stdout,
    message: &T,
) -> std::io::Result<()> {
    let json = serde_json::to_string(message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stdout.write_all(json.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
