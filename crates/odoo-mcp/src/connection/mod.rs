//! Session lifecycle and the `execute_kw` funnel.
//!
//! The connection owns the authenticated Odoo session: database
//! auto-selection, the two authentication paths, locale context injection
//! with the invalid-locale fallback, fault sanitization, transient-error
//! retries, and the metadata/record caches. Every model operation funnels
//! through [`Connection::execute_kw`]; only one XML-RPC call is in flight
//! at a time.

mod perf;
mod sanitize;

pub use perf::{OperationTimer, PerfTracker};
pub use sanitize::sanitize_fault;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};

use odoo_mcp_core::{Config, Domain, ServiceError};
use odoo_xmlrpc::{RpcError, RpcProxy, XmlRpcClient, XmlRpcTransport};

/// Transient transport failures are retried this many times in total.
const MAX_ATTEMPTS: u32 = 3;
/// Linear backoff step between transient retries.
const BACKOFF: Duration = Duration::from_secs(1);

/// How the session authenticated against the ERP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    Password,
    Session,
}

#[derive(Debug, Default)]
struct SessionState {
    connected: bool,
    authenticated: bool,
    uid: i64,
    database: String,
    auth_method: Option<AuthMethod>,
    /// Password or API key; used as the password parameter of every
    /// subsequent RPC call.
    credential: String,
    server_version: Option<String>,
    /// Live locale. Seeded from config at authentication, cleared for the
    /// rest of the session when the ERP rejects it.
    locale: Option<String>,
}

/// The authenticated Odoo session.
pub struct Connection {
    config: Arc<Config>,
    proxy: RpcProxy,
    http: reqwest::Client,
    state: RwLock<SessionState>,
    /// Serializes the in-flight XML-RPC call.
    rpc_gate: tokio::sync::Mutex<()>,
    /// fields_get results per model; no TTL, schemas are session-stable.
    fields_cache: Mutex<HashMap<String, Value>>,
    perf: PerfTracker,
}

impl Connection {
    /// Build a connection over the real HTTP transport.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: Arc<Config>) -> Result<Self, ServiceError> {
        let transport = XmlRpcClient::new(config.base_url(), config.timeout_secs)
            .map_err(|e| ServiceError::connection(format!("Connection failed: {e}")))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build a connection over any transport (tests inject mocks here).
    pub fn with_transport(
        config: Arc<Config>,
        transport: Arc<dyn XmlRpcTransport>,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::connection(format!("Connection failed: {e}")))?;

        Ok(Self {
            config,
            proxy: RpcProxy::new(transport),
            http,
            state: RwLock::new(SessionState::default()),
            rpc_gate: tokio::sync::Mutex::new(()),
            fields_cache: Mutex::new(HashMap::new()),
            perf: PerfTracker::new(),
        })
    }

    // --- lifecycle -------------------------------------------------------

    /// Probe the server and mark the session connected.
    pub async fn connect(&self) -> Result<(), ServiceError> {
        let _timer = self.perf.track("connect");
        let info = self
            .proxy
            .version()
            .await
            .map_err(|e| ServiceError::connection(format!("Connection failed: {e}")))?;

        let mut state = self.state.write();
        state.connected = true;
        state.server_version = info.server_version;
        drop(state);

        tracing::info!(version = ?self.server_version(), "connected to Odoo");
        Ok(())
    }

    /// Authenticate using the configured credentials.
    ///
    /// API key takes precedence; the username/password pair is the
    /// fallback. Returns the uid.
    pub async fn authenticate(&self) -> Result<i64, ServiceError> {
        if !self.is_connected() {
            return Err(ServiceError::connection("Not connected to Odoo"));
        }
        let _timer = self.perf.track("authenticate");
        let database = self.resolve_database().await?;

        let (login, credential, method) = if let Some(key) = &self.config.api_key {
            (
                self.config
                    .username
                    .clone()
                    .unwrap_or_else(|| "__api__".to_string()),
                key.clone(),
                AuthMethod::ApiKey,
            )
        } else if let (Some(user), Some(password)) =
            (&self.config.username, &self.config.password)
        {
            (user.clone(), password.clone(), AuthMethod::Password)
        } else {
            return Err(ServiceError::Authentication(
                "No authentication credentials configured".into(),
            ));
        };

        let uid = self
            .proxy
            .authenticate(&database, &login, &credential)
            .await
            .map_err(|e| {
                ServiceError::connection(format!(
                    "Authentication failed: {}",
                    describe_rpc_error(&e)
                ))
            })?
            .ok_or_else(|| {
                ServiceError::Authentication(match method {
                    AuthMethod::ApiKey => "API key rejected".into(),
                    _ => "Invalid username or password".into(),
                })
            })?;

        let mut state = self.state.write();
        state.authenticated = true;
        state.uid = uid;
        state.database = database;
        state.auth_method = Some(method);
        state.credential = credential;
        state.locale = self.config.locale.clone();
        drop(state);

        tracing::info!(uid, "authenticated with Odoo");
        Ok(uid)
    }

    /// Tear down the session. The metadata cache survives so a reconnect
    /// on the same instance can reuse it.
    pub fn disconnect(&self) {
        let mut state = self.state.write();
        *state = SessionState::default();
        drop(state);
        self.perf.clear();
        tracing::info!("disconnected from Odoo");
    }

    /// Drop all cached model metadata (use before reconnecting to a
    /// different database).
    pub fn clear_metadata_cache(&self) {
        self.fields_cache.lock().clear();
    }

    // --- accessors -------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().authenticated
    }

    pub fn uid(&self) -> i64 {
        self.state.read().uid
    }

    pub fn database(&self) -> Option<String> {
        let state = self.state.read();
        if state.database.is_empty() {
            self.config.database.clone()
        } else {
            Some(state.database.clone())
        }
    }

    pub fn auth_method(&self) -> Option<AuthMethod> {
        self.state.read().auth_method
    }

    pub fn server_version(&self) -> Option<String> {
        self.state.read().server_version.clone()
    }

    /// The locale currently injected into RPC contexts, if any.
    pub fn locale(&self) -> Option<String> {
        self.state.read().locale.clone()
    }

    pub fn perf(&self) -> &PerfTracker {
        &self.perf
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // --- record URLs -----------------------------------------------------

    /// Backend form-view URL for a record.
    ///
    /// Odoo 18 introduced the `/odoo/{model}/{id}` route; older or unknown
    /// versions get the legacy `/web#` fragment URL.
    pub fn build_record_url(&self, model: &str, id: i64) -> String {
        let base = self.config.base_url();
        match self.server_version().as_deref().and_then(parse_major) {
            Some(major) if major >= 18 => format!("{base}/odoo/{model}/{id}"),
            _ => format!("{base}/web#id={id}&model={model}&view_type=form"),
        }
    }

    // --- database selection ---------------------------------------------

    async fn resolve_database(&self) -> Result<String, ServiceError> {
        if let Some(db) = &self.config.database {
            return Ok(db.clone());
        }

        match self.proxy.list_databases().await {
            Ok(dbs) if dbs.len() == 1 => {
                tracing::info!(database = %dbs[0], "auto-selected the only database");
                Ok(dbs.into_iter().next().unwrap_or_default())
            }
            Ok(dbs) if dbs.is_empty() => Err(ServiceError::connection(
                "No databases available on the server",
            )),
            Ok(dbs) => {
                if let Some(db) = self.system_info_database().await {
                    return Ok(db);
                }
                Err(ServiceError::connection(format!(
                    "Multiple databases available ({}); set ODOO_DB to choose one",
                    dbs.join(", ")
                )))
            }
            Err(e) => {
                // Multi-tenant hosts often deny db.list outright.
                if let Some(db) = self.system_info_database().await {
                    return Ok(db);
                }
                Err(ServiceError::connection(format!(
                    "Could not determine database ({}); set ODOO_DB",
                    describe_rpc_error(&e)
                )))
            }
        }
    }

    /// Ask the MCP module's system-info endpoint which database it serves.
    async fn system_info_database(&self) -> Option<String> {
        let url = format!(
            "{}{}",
            self.config.base_url(),
            self.config.endpoint_paths().mcp_system_info
        );
        let mut request = self.http.get(&url);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        let data = &body["data"];
        data["database"]
            .as_str()
            .or_else(|| data["db_name"].as_str())
            .map(str::to_string)
    }

    // --- execute_kw ------------------------------------------------------

    /// Invoke a model method with context injection and fault handling.
    ///
    /// The caller's `kwargs` are never mutated in place: the context is
    /// shallow-copied before the locale is injected, and a caller-provided
    /// `lang` always wins. On an `invalid language code` fault the call is
    /// retried exactly once without the injected `lang`; the locale stays
    /// cleared for the rest of the session.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Connection`] for transport failures (after retries)
    /// and for sanitized server faults.
    pub async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, ServiceError> {
        let (db, uid, credential) = {
            let state = self.state.read();
            if !state.connected || !state.authenticated {
                return Err(ServiceError::connection("Not connected to Odoo"));
            }
            (state.database.clone(), state.uid, state.credential.clone())
        };

        let _timer = self.perf.track("execute_kw");

        let mut kwargs = kwargs;
        let injected_lang = self.inject_locale(&mut kwargs);
        let mut locale_retried = false;
        let mut attempt: u32 = 1;

        loop {
            let result = self
                .dispatch(&db, uid, &credential, model, method, &args, &kwargs)
                .await;

            match result {
                Ok(value) => return Ok(value),
                Err(RpcError::Fault { ref message, .. })
                    if injected_lang
                        && !locale_retried
                        && message.to_lowercase().contains("invalid language code") =>
                {
                    tracing::warn!(
                        locale = ?self.locale(),
                        "Odoo rejected the configured locale; retrying without it"
                    );
                    self.state.write().locale = None;
                    strip_injected_lang(&mut kwargs);
                    locale_retried = true;
                }
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "transient RPC failure, retrying");
                    tokio::time::sleep(BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(RpcError::Fault { message, .. }) => {
                    return Err(ServiceError::connection(format!(
                        "Operation failed: {}",
                        sanitize_fault(&message)
                    )));
                }
                Err(e) => {
                    return Err(ServiceError::connection(format!("Operation failed: {e}")));
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        db: &str,
        uid: i64,
        credential: &str,
        model: &str,
        method: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, RpcError> {
        let _gate = self.rpc_gate.lock().await;

        let xml_args: Vec<odoo_xmlrpc::Value> =
            args.iter().map(odoo_xmlrpc::Value::from_json).collect();
        let xml_kwargs: BTreeMap<String, odoo_xmlrpc::Value> = kwargs
            .iter()
            .map(|(k, v)| (k.clone(), odoo_xmlrpc::Value::from_json(v)))
            .collect();

        let value = self
            .proxy
            .execute_kw(db, uid, credential, model, method, xml_args, xml_kwargs)
            .await?;
        Ok(value.to_json())
    }

    /// Inject `lang` into a shallow-copied context. Returns whether a lang
    /// was injected (a caller-provided one is left untouched).
    fn inject_locale(&self, kwargs: &mut Map<String, Value>) -> bool {
        let Some(locale) = self.locale() else {
            return false;
        };

        let mut context = match kwargs.get("context") {
            Some(Value::Object(ctx)) => {
                if ctx.contains_key("lang") {
                    return false;
                }
                ctx.clone()
            }
            _ => Map::new(),
        };
        context.insert("lang".to_string(), Value::String(locale));
        kwargs.insert("context".to_string(), Value::Object(context));
        true
    }

    // --- convenience operations -----------------------------------------

    /// `search`: matching record ids.
    pub async fn search(
        &self,
        model: &str,
        domain: &Domain,
        limit: Option<u32>,
        offset: Option<u32>,
        order: Option<&str>,
    ) -> Result<Vec<i64>, ServiceError> {
        let mut kwargs = Map::new();
        if let Some(limit) = limit {
            kwargs.insert("limit".into(), json!(limit));
        }
        if let Some(offset) = offset {
            kwargs.insert("offset".into(), json!(offset));
        }
        if let Some(order) = order {
            kwargs.insert("order".into(), json!(order));
        }

        let value = self
            .execute_kw(model, "search", vec![domain.to_json()], kwargs)
            .await?;
        Ok(value
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default())
    }

    /// `read`: records by id. Whole-record reads are served from and
    /// populate the record cache.
    pub async fn read(
        &self,
        model: &str,
        ids: &[i64],
        fields: Option<&[String]>,
    ) -> Result<Vec<Value>, ServiceError> {
        let projected = fields.filter(|f| !f.is_empty());

        if projected.is_none() {
            let cached: Vec<Option<Value>> = ids
                .iter()
                .map(|id| self.perf.cached_record(model, *id))
                .collect();
            if cached.iter().all(Option::is_some) {
                return Ok(cached.into_iter().flatten().collect());
            }
        }

        let mut kwargs = Map::new();
        if let Some(fields) = projected {
            kwargs.insert("fields".into(), json!(fields));
        }

        let value = self
            .execute_kw(model, "read", vec![json!(ids)], kwargs)
            .await?;
        let records: Vec<Value> = value.as_array().cloned().unwrap_or_default();

        if projected.is_none() {
            for record in &records {
                if let Some(id) = record.get("id").and_then(Value::as_i64) {
                    self.perf.cache_record(model, id, record.clone());
                }
            }
        }
        Ok(records)
    }

    /// `search_read`: search and read in one round-trip.
    pub async fn search_read(
        &self,
        model: &str,
        domain: &Domain,
        fields: Option<&[String]>,
        limit: Option<u32>,
        offset: Option<u32>,
        order: Option<&str>,
    ) -> Result<Vec<Value>, ServiceError> {
        let mut kwargs = Map::new();
        if let Some(fields) = fields.filter(|f| !f.is_empty()) {
            kwargs.insert("fields".into(), json!(fields));
        }
        if let Some(limit) = limit {
            kwargs.insert("limit".into(), json!(limit));
        }
        if let Some(offset) = offset {
            kwargs.insert("offset".into(), json!(offset));
        }
        if let Some(order) = order {
            kwargs.insert("order".into(), json!(order));
        }

        let value = self
            .execute_kw(model, "search_read", vec![domain.to_json()], kwargs)
            .await?;
        Ok(value.as_array().cloned().unwrap_or_default())
    }

    /// `search_count`: number of records matching the domain.
    pub async fn search_count(&self, model: &str, domain: &Domain) -> Result<i64, ServiceError> {
        let value = self
            .execute_kw(model, "search_count", vec![domain.to_json()], Map::new())
            .await?;
        Ok(value.as_i64().unwrap_or_default())
    }

    /// `fields_get`: field metadata. Memoized per model when called
    /// without an attribute projection.
    pub async fn fields_get(
        &self,
        model: &str,
        attributes: Option<&[&str]>,
    ) -> Result<Value, ServiceError> {
        if attributes.is_none() {
            if let Some(cached) = self.fields_cache.lock().get(model).cloned() {
                return Ok(cached);
            }
        }

        let mut kwargs = Map::new();
        if let Some(attrs) = attributes {
            kwargs.insert("attributes".into(), json!(attrs));
        }

        let value = self
            .execute_kw(model, "fields_get", Vec::new(), kwargs)
            .await?;

        if attributes.is_none() {
            self.fields_cache
                .lock()
                .insert(model.to_string(), value.clone());
        }
        Ok(value)
    }

    /// `create`: returns the new record id and invalidates the model's
    /// cached records.
    pub async fn create(&self, model: &str, values: Map<String, Value>) -> Result<i64, ServiceError> {
        let value = self
            .execute_kw(model, "create", vec![Value::Object(values)], Map::new())
            .await?;
        let id = value
            .as_i64()
            .ok_or_else(|| ServiceError::connection("create returned no record id"))?;
        self.perf.invalidate_model(model);
        Ok(id)
    }

    /// `write`: update records; invalidates their cache entries.
    pub async fn write(
        &self,
        model: &str,
        ids: &[i64],
        values: Map<String, Value>,
    ) -> Result<bool, ServiceError> {
        let value = self
            .execute_kw(
                model,
                "write",
                vec![json!(ids), Value::Object(values)],
                Map::new(),
            )
            .await?;
        self.perf.invalidate_ids(model, ids);
        Ok(value.as_bool().unwrap_or(true))
    }

    /// `unlink`: delete records; invalidates their cache entries.
    pub async fn unlink(&self, model: &str, ids: &[i64]) -> Result<bool, ServiceError> {
        let value = self
            .execute_kw(model, "unlink", vec![json!(ids)], Map::new())
            .await?;
        self.perf.invalidate_ids(model, ids);
        Ok(value.as_bool().unwrap_or(true))
    }

    /// Generic method invocation (`action_confirm`, `button_validate`, ...).
    pub async fn execute(
        &self,
        model: &str,
        action: &str,
        ids: &[i64],
    ) -> Result<Value, ServiceError> {
        self.execute_kw(model, action, vec![json!(ids)], Map::new())
            .await
    }
}

/// Remove the lang we injected, restoring the caller's context shape.
fn strip_injected_lang(kwargs: &mut Map<String, Value>) {
    if let Some(Value::Object(context)) = kwargs.get_mut("context") {
        context.remove("lang");
        if context.is_empty() {
            kwargs.remove("context");
        }
    }
}

/// Extract the major version from `"18.0"`, `"saas~17.4"`, or similar.
fn parse_major(version: &str) -> Option<u32> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix("saas~").unwrap_or(trimmed);
    let digits: String = trimmed.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn describe_rpc_error(e: &RpcError) -> String {
    match e {
        RpcError::Fault { message, .. } => sanitize_fault(message),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odoo_mcp_core::YoloMode;
    use odoo_xmlrpc::MockTransport;

    fn config() -> Arc<Config> {
        Arc::new(
            Config::builder()
                .url("https://odoo.example.com")
                .database("prod")
                .api_key("test-key")
                .build()
                .unwrap(),
        )
    }

    fn config_with_locale(locale: &str) -> Arc<Config> {
        Arc::new(
            Config::builder()
                .url("https://odoo.example.com")
                .database("prod")
                .username("admin")
                .api_key("test-key")
                .locale(locale)
                .yolo_mode(YoloMode::Off)
                .build()
                .unwrap(),
        )
    }

    fn version_reply(version: &str) -> odoo_xmlrpc::Value {
        odoo_xmlrpc::Value::Struct(BTreeMap::from([
            (
                "server_version".to_string(),
                odoo_xmlrpc::Value::String(version.into()),
            ),
            ("protocol_version".to_string(), odoo_xmlrpc::Value::Int(1)),
        ]))
    }

    async fn connected(
        config: Arc<Config>,
        mock: Arc<MockTransport>,
        version: &str,
    ) -> Connection {
        mock.expect("version", Ok(version_reply(version)));
        mock.expect("authenticate", Ok(odoo_xmlrpc::Value::Int(2)));
        let conn = Connection::with_transport(config, mock).unwrap();
        conn.connect().await.unwrap();
        conn.authenticate().await.unwrap();
        conn
    }

    #[tokio::test]
    async fn connect_then_authenticate() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config(), mock.clone(), "18.0").await;

        assert!(conn.is_connected());
        assert!(conn.is_authenticated());
        assert_eq!(conn.uid(), 2);
        assert_eq!(conn.auth_method(), Some(AuthMethod::ApiKey));
        assert_eq!(conn.database().as_deref(), Some("prod"));
    }

    #[tokio::test]
    async fn rejected_api_key() {
        let mock = Arc::new(MockTransport::new());
        mock.expect("version", Ok(version_reply("18.0")));
        mock.expect("authenticate", Ok(odoo_xmlrpc::Value::Bool(false)));

        let conn = Connection::with_transport(config(), mock).unwrap();
        conn.connect().await.unwrap();
        let err = conn.authenticate().await.unwrap_err();
        assert!(matches!(err, ServiceError::Authentication(_)));
        assert!(err.to_string().contains("API key rejected"));
    }

    #[tokio::test]
    async fn password_path_records_method() {
        let config = Arc::new(
            Config::builder()
                .url("https://odoo.example.com")
                .database("prod")
                .username("admin")
                .password("secret")
                .build()
                .unwrap(),
        );
        let mock = Arc::new(MockTransport::new());
        mock.expect("version", Ok(version_reply("17.0")));
        mock.expect("authenticate", Ok(odoo_xmlrpc::Value::Int(5)));

        let conn = Connection::with_transport(config, mock.clone()).unwrap();
        conn.connect().await.unwrap();
        conn.authenticate().await.unwrap();
        assert_eq!(conn.auth_method(), Some(AuthMethod::Password));

        // The password rides along as the credential parameter.
        let auth_call = &mock.calls()[1];
        assert_eq!(
            auth_call.params[2],
            odoo_xmlrpc::Value::String("secret".into())
        );
    }

    #[tokio::test]
    async fn execute_before_auth_fails_fast() {
        let conn = Connection::with_transport(config(), Arc::new(MockTransport::new())).unwrap();
        let err = conn
            .execute_kw("res.partner", "search", vec![json!([])], Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Connection(_)));
    }

    #[tokio::test]
    async fn auto_selects_single_database() {
        let config = Arc::new(
            Config::builder()
                .url("https://odoo.example.com")
                .api_key("k")
                .build()
                .unwrap(),
        );
        let mock = Arc::new(MockTransport::new());
        mock.expect("version", Ok(version_reply("18.0")));
        mock.expect(
            "list",
            Ok(odoo_xmlrpc::Value::Array(vec![odoo_xmlrpc::Value::String(
                "onlydb".into(),
            )])),
        );
        mock.expect("authenticate", Ok(odoo_xmlrpc::Value::Int(2)));

        let conn = Connection::with_transport(config, mock).unwrap();
        conn.connect().await.unwrap();
        conn.authenticate().await.unwrap();
        assert_eq!(conn.database().as_deref(), Some("onlydb"));
    }

    #[tokio::test]
    async fn locale_is_injected_into_context() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config_with_locale("es_ES"), mock.clone(), "18.0").await;

        mock.expect("execute_kw:search", Ok(odoo_xmlrpc::Value::Array(vec![])));
        conn.execute_kw("res.partner", "search", vec![json!([])], Map::new())
            .await
            .unwrap();

        let call = mock.calls().last().unwrap().clone();
        let kwargs = call.kwargs().unwrap().clone();
        let context = kwargs["context"].as_struct().unwrap().clone();
        assert_eq!(
            context["lang"],
            odoo_xmlrpc::Value::String("es_ES".into())
        );
    }

    #[tokio::test]
    async fn caller_lang_takes_precedence() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config_with_locale("es_ES"), mock.clone(), "18.0").await;

        mock.expect("execute_kw:search", Ok(odoo_xmlrpc::Value::Array(vec![])));
        let mut kwargs = Map::new();
        kwargs.insert("context".into(), json!({"lang": "fr_FR"}));
        conn.execute_kw("res.partner", "search", vec![json!([])], kwargs)
            .await
            .unwrap();

        let call = mock.calls().last().unwrap().clone();
        let context = call.kwargs().unwrap()["context"].as_struct().unwrap().clone();
        assert_eq!(context["lang"], odoo_xmlrpc::Value::String("fr_FR".into()));
    }

    #[tokio::test]
    async fn kwargs_do_not_leak_between_calls() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config_with_locale("es_ES"), mock.clone(), "18.0").await;

        mock.expect("execute_kw:search", Ok(odoo_xmlrpc::Value::Array(vec![])));
        mock.expect("execute_kw:search", Ok(odoo_xmlrpc::Value::Array(vec![])));

        conn.execute_kw("res.partner", "search", vec![json!([])], Map::new())
            .await
            .unwrap();
        let mut kwargs = Map::new();
        kwargs.insert("context".into(), json!({"tz": "UTC"}));
        conn.execute_kw("res.partner", "search", vec![json!([])], kwargs)
            .await
            .unwrap();

        let calls = mock.calls();
        let first = calls[calls.len() - 2].kwargs().unwrap().clone();
        let second = calls[calls.len() - 1].kwargs().unwrap().clone();
        // Both carry lang, but the second kept its own tz and the first has none.
        assert!(first["context"].as_struct().unwrap().contains_key("lang"));
        assert!(!first["context"].as_struct().unwrap().contains_key("tz"));
        assert!(second["context"].as_struct().unwrap().contains_key("tz"));
    }

    #[tokio::test]
    async fn invalid_locale_retries_once_and_clears() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config_with_locale("es_ES"), mock.clone(), "18.0").await;

        mock.expect(
            "execute_kw:search",
            Err(RpcError::Fault {
                code: 1,
                message: "Invalid language code: es_ES".into(),
            }),
        );
        mock.expect("execute_kw:search", Ok(odoo_xmlrpc::Value::Array(vec![])));

        conn.execute_kw("res.partner", "search", vec![json!([])], Map::new())
            .await
            .unwrap();

        assert_eq!(mock.call_count("execute_kw:search"), 2);
        assert_eq!(conn.locale(), None);

        // The retry went out without a lang context.
        let retry = mock.calls().last().unwrap().clone();
        assert!(!retry.kwargs().unwrap().contains_key("context"));

        // Subsequent calls stay bare.
        mock.expect("execute_kw:search", Ok(odoo_xmlrpc::Value::Array(vec![])));
        conn.execute_kw("res.partner", "search", vec![json!([])], Map::new())
            .await
            .unwrap();
        let last = mock.calls().last().unwrap().clone();
        assert!(!last.kwargs().unwrap().contains_key("context"));
    }

    #[tokio::test]
    async fn second_locale_fault_propagates() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config_with_locale("es_ES"), mock.clone(), "18.0").await;

        mock.expect(
            "execute_kw:search",
            Err(RpcError::Fault {
                code: 1,
                message: "Invalid language code: es_ES".into(),
            }),
        );
        mock.expect(
            "execute_kw:search",
            Err(RpcError::Fault {
                code: 1,
                message: "Invalid language code: es_ES".into(),
            }),
        );

        let err = conn
            .execute_kw("res.partner", "search", vec![json!([])], Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Connection(_)));
        assert_eq!(mock.call_count("execute_kw:search"), 2);
    }

    #[tokio::test]
    async fn faults_are_sanitized() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config(), mock.clone(), "18.0").await;

        mock.expect(
            "execute_kw:read",
            Err(RpcError::Fault {
                code: 1,
                message: "Traceback (most recent call last):\n  File \"/opt/odoo/api.py\"\nValueError: bad field".into(),
            }),
        );

        let err = conn
            .read("res.partner", &[1], None)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Operation failed:"));
        assert!(msg.contains("ValueError: bad field"));
        assert!(!msg.contains("/opt/"));
        assert!(!msg.contains("Traceback"));
    }

    #[tokio::test]
    async fn write_invalidates_record_cache() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config(), mock.clone(), "18.0").await;

        mock.expect(
            "execute_kw:read",
            Ok(odoo_xmlrpc::Value::Array(vec![odoo_xmlrpc::Value::Struct(
                BTreeMap::from([
                    ("id".to_string(), odoo_xmlrpc::Value::Int(1)),
                    (
                        "name".to_string(),
                        odoo_xmlrpc::Value::String("Old Name".into()),
                    ),
                ]),
            )])),
        );
        let first = conn.read("res.partner", &[1], None).await.unwrap();
        assert_eq!(first[0]["name"], "Old Name");

        // Cached: a second full read needs no RPC.
        let cached = conn.read("res.partner", &[1], None).await.unwrap();
        assert_eq!(cached[0]["name"], "Old Name");
        assert_eq!(mock.call_count("execute_kw:read"), 1);

        mock.expect("execute_kw:write", Ok(odoo_xmlrpc::Value::Bool(true)));
        conn.write("res.partner", &[1], Map::from_iter([("name".to_string(), json!("New Name"))]))
            .await
            .unwrap();

        mock.expect(
            "execute_kw:read",
            Ok(odoo_xmlrpc::Value::Array(vec![odoo_xmlrpc::Value::Struct(
                BTreeMap::from([
                    ("id".to_string(), odoo_xmlrpc::Value::Int(1)),
                    (
                        "name".to_string(),
                        odoo_xmlrpc::Value::String("New Name".into()),
                    ),
                ]),
            )])),
        );
        let fresh = conn.read("res.partner", &[1], None).await.unwrap();
        assert_eq!(fresh[0]["name"], "New Name");
        assert_eq!(mock.call_count("execute_kw:read"), 2);
    }

    #[tokio::test]
    async fn fields_get_memoizes_without_attributes() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config(), mock.clone(), "18.0").await;

        let fields = odoo_xmlrpc::Value::Struct(BTreeMap::from([(
            "name".to_string(),
            odoo_xmlrpc::Value::Struct(BTreeMap::from([(
                "type".to_string(),
                odoo_xmlrpc::Value::String("char".into()),
            )])),
        )]));
        mock.expect("execute_kw:fields_get", Ok(fields.clone()));

        conn.fields_get("res.partner", None).await.unwrap();
        conn.fields_get("res.partner", None).await.unwrap();
        assert_eq!(mock.call_count("execute_kw:fields_get"), 1);

        // With attributes the cache is bypassed.
        mock.expect("execute_kw:fields_get", Ok(fields));
        conn.fields_get("res.partner", Some(&["string", "type"]))
            .await
            .unwrap();
        assert_eq!(mock.call_count("execute_kw:fields_get"), 2);
    }

    #[test]
    fn version_gating() {
        assert_eq!(parse_major("18.0"), Some(18));
        assert_eq!(parse_major("saas~18.1"), Some(18));
        assert_eq!(parse_major("17.0"), Some(17));
        assert_eq!(parse_major("saas~17.4"), Some(17));
        assert_eq!(parse_major("19.0"), Some(19));
        assert_eq!(parse_major("garbage"), None);
    }

    #[tokio::test]
    async fn record_urls_follow_server_version() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config(), mock, "18.0").await;
        assert_eq!(
            conn.build_record_url("res.partner", 7),
            "https://odoo.example.com/odoo/res.partner/7"
        );

        let mock = Arc::new(MockTransport::new());
        let conn = connected(config(), mock, "saas~17.4").await;
        assert_eq!(
            conn.build_record_url("res.partner", 7),
            "https://odoo.example.com/web#id=7&model=res.partner&view_type=form"
        );
    }

    #[tokio::test]
    async fn unknown_version_uses_legacy_url() {
        let mock = Arc::new(MockTransport::new());
        mock.expect(
            "version",
            Ok(odoo_xmlrpc::Value::Struct(BTreeMap::new())),
        );
        mock.expect("authenticate", Ok(odoo_xmlrpc::Value::Int(2)));
        let conn = Connection::with_transport(config(), mock).unwrap();
        conn.connect().await.unwrap();
        conn.authenticate().await.unwrap();
        assert!(conn.build_record_url("res.partner", 7).contains("/web#id=7"));
    }

    #[tokio::test]
    async fn disconnect_clears_session_but_keeps_metadata() {
        let mock = Arc::new(MockTransport::new());
        let conn = connected(config(), mock.clone(), "18.0").await;

        mock.expect(
            "execute_kw:fields_get",
            Ok(odoo_xmlrpc::Value::Struct(BTreeMap::new())),
        );
        conn.fields_get("res.partner", None).await.unwrap();

        conn.disconnect();
        assert!(!conn.is_connected());
        assert!(!conn.is_authenticated());

        // Reconnect reuses the memoized fields without another RPC.
        mock.expect("version", Ok(version_reply("18.0")));
        mock.expect("authenticate", Ok(odoo_xmlrpc::Value::Int(2)));
        conn.connect().await.unwrap();
        conn.authenticate().await.unwrap();
        conn.fields_get("res.partner", None).await.unwrap();
        assert_eq!(mock.call_count("execute_kw:fields_get"), 1);
    }
}
