//! Request handlers: resources, structured tools, and business workflows.

pub mod resources;
pub mod tools;
pub mod workflows;

pub use resources::ResourceHandler;
pub use tools::{LogContext, ToolHandler};
pub use workflows::WorkflowHandler;

use odoo_mcp_core::ServiceError;

use crate::access::AccessDenied;

/// Access denials surface as 403s with a uniform prefix.
pub(crate) fn access_denied(err: AccessDenied) -> ServiceError {
    ServiceError::permission(format!("Access denied: {err}"))
}
