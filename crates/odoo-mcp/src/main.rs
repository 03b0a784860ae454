//! `odoo-mcp` binary: flag parsing, environment loading, logging setup,
//! and the server lifespan.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use odoo_mcp::server::OdooMcpServer;
use odoo_mcp_core::{Config, Transport, YoloMode};

/// MCP server for Odoo.
#[derive(Parser, Debug)]
#[command(name = "odoo-mcp", version, about = "MCP server bridging AI clients to Odoo")]
struct Cli {
    /// Odoo server URL (env: ODOO_URL)
    #[arg(long)]
    url: Option<String>,

    /// Odoo database name (env: ODOO_DB)
    #[arg(long)]
    db: Option<String>,

    /// Odoo API key (env: ODOO_API_KEY)
    #[arg(long)]
    token: Option<String>,

    /// Logging level (env: ODOO_MCP_LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    /// Default record limit for searches (env: ODOO_MCP_DEFAULT_LIMIT)
    #[arg(long)]
    default_limit: Option<u32>,

    /// Maximum allowed record limit (env: ODOO_MCP_MAX_LIMIT)
    #[arg(long)]
    max_limit: Option<u32>,

    /// Path to a .env file to load before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Transport: stdio or streamable-http (env: ODOO_MCP_TRANSPORT)
    #[arg(long)]
    transport: Option<String>,

    /// Bind host for the HTTP transport (env: ODOO_MCP_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port for the HTTP transport (env: ODOO_MCP_PORT)
    #[arg(long)]
    port: Option<u16>,
}

fn build_config(cli: &Cli) -> Result<Config, String> {
    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path).map_err(|e| format!("could not load {}: {e}", path.display()))?;
    } else {
        // Best effort: a missing default .env is fine.
        let _ = dotenvy::dotenv();
    }

    let mut builder = Config::builder();
    if let Some(url) = &cli.url {
        builder = builder.url(url);
    }
    if let Some(db) = &cli.db {
        builder = builder.database(db);
    }
    if let Some(token) = &cli.token {
        builder = builder.api_key(token);
    }
    if let Some(level) = &cli.log_level {
        builder = builder.log_level(level);
    }
    if let Some(limit) = cli.default_limit {
        builder = builder.default_limit(limit);
    }
    if let Some(limit) = cli.max_limit {
        builder = builder.max_limit(limit);
    }
    if let Some(transport) = &cli.transport {
        builder = builder.transport(Transport::parse(transport).map_err(|e| e.to_string())?);
    }
    if let Some(host) = &cli.host {
        builder = builder.host(host);
    }
    if let Some(port) = cli.port {
        builder = builder.port(port);
    }

    builder.build().map_err(|e| e.to_string())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));

    // Stdout belongs to the stdio transport; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Configuration error: {message}");
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(
        url = %config.url,
        transport = %config.transport,
        yolo = %config.yolo_mode,
        "starting odoo-mcp"
    );
    if config.yolo_mode != YoloMode::Off {
        tracing::warn!(
            level = %config.yolo_mode,
            "YOLO mode bypasses the ERP's MCP allowlist"
        );
    }

    let server = match OdooMcpServer::new(Arc::new(config)) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize server");
            std::process::exit(1);
        }
    };

    if let Err(e) = odoo_mcp::transport::serve(server).await {
        tracing::error!(error = %e, "server exited with an error");
        std::process::exit(1);
    }
}
