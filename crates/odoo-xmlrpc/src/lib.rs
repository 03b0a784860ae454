//! `odoo-xmlrpc` — XML-RPC plumbing for the Odoo MCP bridge.
//!
//! Odoo speaks XML-RPC on `/xmlrpc/2/{common,object,db}`. This crate holds
//! the typed value model, the wire codec (with `<nil/>` support so Odoo's
//! nullable scalars survive the round-trip), and an async reqwest-backed
//! client behind the [`XmlRpcTransport`] trait so the connection layer can
//! be exercised against in-process mocks.

#![forbid(unsafe_code)]

mod client;
pub mod mock;
mod proxy;
mod value;
mod wire;

pub use client::{Service, XmlRpcClient, XmlRpcTransport};
pub use mock::MockTransport;
pub use proxy::{RpcProxy, VersionInfo};
pub use value::Value;
pub use wire::{decode_response, encode_call};

use thiserror::Error;

/// Errors from the RPC layer.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The server returned an XML-RPC fault.
    #[error("fault {code}: {message}")]
    Fault { code: i32, message: String },
    /// Network-level failure (connect, reset, timeout). Retryable.
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status from the endpoint. Not retryable.
    #[error("http error: {0}")]
    Http(String),
    /// The response body was not valid XML-RPC.
    #[error("decode error: {0}")]
    Decode(String),
}

impl RpcError {
    /// True for errors worth retrying (transient transport failures only).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// The fault message, when this is a fault.
    pub fn fault_message(&self) -> Option<&str> {
        match self {
            Self::Fault { message, .. } => Some(message),
            _ => None,
        }
    }
}
