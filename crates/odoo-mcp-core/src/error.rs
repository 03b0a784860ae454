//! Error taxonomy for the bridge.
//!
//! Five kinds plus a catch-all, each mapped to an HTTP-like status code.
//! Handlers convert lower-layer failures into these before anything
//! crosses the MCP boundary; the envelope form is what tool callers see.

use serde_json::{json, Value};
use thiserror::Error;

/// The error surface every handler speaks.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Input-level failure: bad id, malformed domain, unauthenticated session (400).
    #[error("{0}")]
    Validation(String),
    /// Credentials rejected by the ERP or its REST surface (401).
    #[error("{0}")]
    Authentication(String),
    /// Access control denied the operation (403).
    #[error("{0}")]
    Permission(String),
    /// Record or model missing (404).
    #[error("{0}")]
    NotFound(String),
    /// Transport or RPC fault after retries (503).
    #[error("{0}")]
    Connection(String),
    /// Anything unclassified (500).
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// HTTP-like status code for this error kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Authentication(_) => 401,
            Self::Permission(_) => 403,
            Self::NotFound(_) => 404,
            Self::Connection(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    /// User-facing label for the status code.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Invalid request",
            Self::Authentication(_) => "Authentication failed",
            Self::Permission(_) => "Permission denied",
            Self::NotFound(_) => "Resource not found",
            Self::Connection(_) => "Service unavailable",
            Self::Internal(_) => "Server error",
        }
    }

    /// Render as the MCP tool error envelope.
    ///
    /// The envelope is `{is_error: true, content: [{type: "text", text}]}`
    /// with the text formatted as `"<label>: <message>"`.
    pub fn to_envelope(&self) -> Value {
        json!({
            "is_error": true,
            "content": [{
                "type": "text",
                "text": format!("{}: {}", self.status_label(), self),
            }],
        })
    }

    /// Shorthand constructors used throughout the handlers.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }
}
