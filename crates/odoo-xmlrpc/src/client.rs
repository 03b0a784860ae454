//! Async XML-RPC client over reqwest.

use std::time::Duration;

use async_trait::async_trait;

use crate::{decode_response, encode_call, RpcError, Value};

/// The three XML-RPC services Odoo exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Common,
    Object,
    Db,
}

impl Service {
    /// Path under the instance base URL.
    pub fn path(self) -> &'static str {
        match self {
            Self::Common => "/xmlrpc/2/common",
            Self::Object => "/xmlrpc/2/object",
            Self::Db => "/xmlrpc/2/db",
        }
    }
}

/// Seam between the connection layer and the wire.
///
/// Production uses [`XmlRpcClient`]; tests swap in an in-process mock.
#[async_trait]
pub trait XmlRpcTransport: Send + Sync {
    /// Invoke `method` on `service` and decode the response value.
    async fn call(
        &self,
        service: Service,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, RpcError>;
}

/// HTTP-backed XML-RPC client.
pub struct XmlRpcClient {
    http: reqwest::Client,
    base_url: String,
}

impl XmlRpcClient {
    /// Build a client for the given instance base URL.
    ///
    /// # Errors
    ///
    /// Fails when the underlying HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, service: Service) -> String {
        format!("{}{}", self.base_url, service.path())
    }
}

#[async_trait]
impl XmlRpcTransport for XmlRpcClient {
    async fn call(
        &self,
        service: Service,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        let body = encode_call(method, &params);
        tracing::trace!(service = service.path(), method, "xmlrpc.call");

        let response = self
            .http
            .post(self.endpoint(service))
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Http(format!(
                "{} returned HTTP {}",
                service.path(),
                status.as_u16()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        decode_response(&text)
    }
}
