//! `odoo-mcp` — the MCP server bridging AI clients to an Odoo instance.
//!
//! Clients discover business models, read and search records through
//! `odoo://` resources, mutate data through access-controlled CRUD tools,
//! and drive multi-step workflows (quotations, purchases, manufacturing,
//! stock moves). Every operation funnels through one authenticated
//! XML-RPC session with locale handling, fault sanitization, and bounded
//! caches.
//!
//! ```text
//! client ──MCP──▶ Server ──▶ Tool/Resource/Workflow handlers
//!                               │ access gate
//!                               ▼
//!                           Connection ──XML-RPC──▶ Odoo
//! ```

#![forbid(unsafe_code)]

pub mod access;
pub mod connection;
pub mod formatter;
pub mod handlers;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod transport;

pub use access::{AccessController, AccessDenied, EnabledModel, ModelPermissions};
pub use connection::{AuthMethod, Connection, PerfTracker};
pub use handlers::{LogContext, ResourceHandler, ToolHandler, WorkflowHandler};
pub use server::OdooMcpServer;
