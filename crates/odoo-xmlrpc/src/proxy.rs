//! Typed facade over the raw XML-RPC surface.
//!
//! `RpcProxy` maps Odoo's `common`, `db`, and `object` methods onto typed
//! Rust signatures. All faults come back as [`RpcError::Fault`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{RpcError, Service, Value, XmlRpcTransport};

/// Result of `common.version()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionInfo {
    pub server_version: Option<String>,
    pub protocol_version: Option<i64>,
}

/// Thin typed client for Odoo's XML-RPC services.
#[derive(Clone)]
pub struct RpcProxy {
    transport: Arc<dyn XmlRpcTransport>,
}

impl RpcProxy {
    pub fn new(transport: Arc<dyn XmlRpcTransport>) -> Self {
        Self { transport }
    }

    /// `common.version`: server reachability probe and version discovery.
    pub async fn version(&self) -> Result<VersionInfo, RpcError> {
        let value = self
            .transport
            .call(Service::Common, "version", Vec::new())
            .await?;

        let map = value.as_struct().cloned().unwrap_or_default();
        Ok(VersionInfo {
            server_version: map
                .get("server_version")
                .and_then(Value::as_str)
                .map(str::to_string),
            protocol_version: map.get("protocol_version").and_then(Value::as_i64),
        })
    }

    /// `common.authenticate`: returns the uid, or `None` when rejected
    /// (Odoo signals rejection as boolean `false`).
    pub async fn authenticate(
        &self,
        db: &str,
        login: &str,
        credential: &str,
    ) -> Result<Option<i64>, RpcError> {
        let params = vec![
            Value::from(db),
            Value::from(login),
            Value::from(credential),
            Value::Struct(BTreeMap::new()),
        ];
        let value = self
            .transport
            .call(Service::Common, "authenticate", params)
            .await?;
        Ok(value.as_uid())
    }

    /// `db.list`: may fault with "Access Denied" on multi-tenant hosts.
    pub async fn list_databases(&self) -> Result<Vec<String>, RpcError> {
        let value = self.transport.call(Service::Db, "list", Vec::new()).await?;
        let names = value
            .as_array()
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        Ok(names)
    }

    /// `object.execute_kw`: the workhorse behind every model operation.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_kw(
        &self,
        db: &str,
        uid: i64,
        credential: &str,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, RpcError> {
        let params = vec![
            Value::from(db),
            Value::Int(uid),
            Value::from(credential),
            Value::from(model),
            Value::from(method),
            Value::Array(args),
            Value::Struct(kwargs),
        ];
        self.transport
            .call(Service::Object, "execute_kw", params)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Transport that records calls and replays canned values.
    struct Recorder {
        calls: Mutex<Vec<(Service, String, Vec<Value>)>>,
        replies: Mutex<Vec<Result<Value, RpcError>>>,
    }

    impl Recorder {
        fn new(replies: Vec<Result<Value, RpcError>>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait]
    impl XmlRpcTransport for Recorder {
        async fn call(
            &self,
            service: Service,
            method: &str,
            params: Vec<Value>,
        ) -> Result<Value, RpcError> {
            self.calls
                .lock()
                .unwrap()
                .push((service, method.to_string(), params));
            self.replies.lock().unwrap().remove(0)
        }
    }

    #[tokio::test]
    async fn version_parses_struct() {
        let reply = Value::Struct(BTreeMap::from([
            ("server_version".to_string(), Value::String("18.0".into())),
            ("protocol_version".to_string(), Value::Int(1)),
        ]));
        let transport = Arc::new(Recorder::new(vec![Ok(reply)]));
        let proxy = RpcProxy::new(transport.clone());

        let info = proxy.version().await.unwrap();
        assert_eq!(info.server_version.as_deref(), Some("18.0"));
        assert_eq!(info.protocol_version, Some(1));

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].0, Service::Common);
        assert_eq!(calls[0].1, "version");
    }

    #[tokio::test]
    async fn authenticate_collapses_false() {
        let transport = Arc::new(Recorder::new(vec![
            Ok(Value::Int(2)),
            Ok(Value::Bool(false)),
        ]));
        let proxy = RpcProxy::new(transport.clone());

        assert_eq!(proxy.authenticate("db", "admin", "key").await.unwrap(), Some(2));
        assert_eq!(proxy.authenticate("db", "admin", "bad").await.unwrap(), None);

        // Positional args carry db, login, credential, and an empty context.
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].2.len(), 4);
        assert_eq!(calls[0].2[3], Value::Struct(BTreeMap::new()));
    }

    #[tokio::test]
    async fn execute_kw_shapes_params() {
        let transport = Arc::new(Recorder::new(vec![Ok(Value::Array(vec![Value::Int(1)]))]));
        let proxy = RpcProxy::new(transport.clone());

        let kwargs = BTreeMap::from([("limit".to_string(), Value::Int(5))]);
        proxy
            .execute_kw("db", 2, "key", "res.partner", "search", vec![Value::Array(vec![])], kwargs)
            .await
            .unwrap();

        let calls = transport.calls.lock().unwrap();
        let params = &calls[0].2;
        assert_eq!(params[0], Value::String("db".into()));
        assert_eq!(params[1], Value::Int(2));
        assert_eq!(params[3], Value::String("res.partner".into()));
        assert_eq!(params[4], Value::String("search".into()));
    }

    #[tokio::test]
    async fn list_databases_filters_strings() {
        let reply = Value::Array(vec![
            Value::String("prod".into()),
            Value::String("staging".into()),
        ]);
        let proxy = RpcProxy::new(Arc::new(Recorder::new(vec![Ok(reply)])));
        assert_eq!(proxy.list_databases().await.unwrap(), vec!["prod", "staging"]);
    }
}
