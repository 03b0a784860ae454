//! `odoo-mcp-core` — shared types for the Odoo MCP bridge.
//!
//! Everything in this crate is transport-agnostic and synchronous: the
//! runtime configuration, the error taxonomy every handler speaks, the
//! `odoo://` resource URI codec, and the search-domain parser. The RPC
//! and server layers build on top of these.

#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod text;
pub mod uri;

pub use config::{Config, ConfigBuilder, ConfigError, EndpointPaths, Transport, YoloMode};
pub use domain::{Domain, DomainItem};
pub use error::ServiceError;
pub use uri::{build_resource_uri, parse_uri, ParsedUri, ResourceOp};
