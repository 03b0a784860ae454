//! Transport selection and the session lifespan.
//!
//! The lifespan wrapper guarantees the Odoo session is torn down on every
//! exit path: clean shutdown, transport error, or EOF on stdin.

pub mod http;
pub mod stdio;

use std::sync::Arc;

use odoo_mcp_core::Transport;

use crate::server::OdooMcpServer;

/// Connect, serve on the configured transport, and disconnect.
pub async fn serve(server: Arc<OdooMcpServer>) -> anyhow::Result<()> {
    server.startup().await?;

    let result = match server.config().transport {
        Transport::Stdio => stdio::run(server.clone()).await,
        Transport::StreamableHttp => http::run(server.clone()).await,
    };

    server.shutdown();
    result
}
