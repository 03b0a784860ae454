//! Access control: per-model permission checks with a TTL cache.
//!
//! Standard mode answers from the ERP's MCP REST surface (`/mcp/models`,
//! `/mcp/models/{model}/permissions`), authenticated by API key header or
//! by a web session cookie when only username/password are configured.
//! YOLO mode bypasses the ERP entirely and enforces read-vs-write gating
//! on the client side.
//!
//! Decisions are a plain `(allowed, reason)` pair; the typed error
//! conversion happens at the handler boundary, not here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;

use odoo_mcp_core::{Config, ServiceError, YoloMode};

/// Cached REST responses live this long.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// A denied access check, carrying the reason.
///
/// Handlers convert this into the 403 side of the taxonomy with an
/// `Access denied:` prefix.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct AccessDenied(pub String);

/// One model the ERP exposes over MCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledModel {
    pub model: String,
    pub name: String,
}

/// Permission matrix for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPermissions {
    pub model: String,
    pub enabled: bool,
    pub can_read: bool,
    pub can_write: bool,
    pub can_create: bool,
    pub can_unlink: bool,
}

impl ModelPermissions {
    /// Permissions under a YOLO policy.
    pub fn yolo(model: &str, mode: YoloMode) -> Self {
        let all = mode == YoloMode::True;
        Self {
            model: model.to_string(),
            enabled: mode.is_enabled(),
            can_read: mode.is_enabled(),
            can_write: all,
            can_create: all,
            can_unlink: all,
        }
    }

    /// Check one operation. `delete` is an alias for `unlink`; unknown
    /// operation names are denied.
    pub fn can_perform(&self, operation: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match operation {
            "read" => self.can_read,
            "write" => self.can_write,
            "create" => self.can_create,
            "unlink" | "delete" => self.can_unlink,
            _ => false,
        }
    }

    fn from_rest(model: &str, data: &Value) -> Self {
        let ops = &data["operations"];
        Self {
            model: model.to_string(),
            enabled: data["enabled"].as_bool().unwrap_or(false),
            can_read: ops["read"].as_bool().unwrap_or(false),
            can_write: ops["write"].as_bool().unwrap_or(false),
            can_create: ops["create"].as_bool().unwrap_or(false),
            can_unlink: ops["unlink"].as_bool().unwrap_or(false),
        }
    }
}

struct CacheEntry {
    value: Value,
    cached_at: Instant,
}

/// The access-control engine.
pub struct AccessController {
    config: Arc<Config>,
    http: reqwest::Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
    /// Web session cookie for credential-only configs.
    session_id: Mutex<Option<String>>,
    /// The effective database; set after connection-time auto-selection.
    database: Mutex<Option<String>>,
}

impl AccessController {
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: Arc<Config>) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::connection(format!("Connection failed: {e}")))?;

        let database = Mutex::new(config.database.clone());
        Ok(Self {
            config,
            http,
            cache: Mutex::new(HashMap::new()),
            session_id: Mutex::new(None),
            database,
        })
    }

    /// Record the database the connection settled on (auto-selection).
    pub fn set_database(&self, database: impl Into<String>) {
        *self.database.lock() = Some(database.into());
    }

    /// Drop every cached REST response.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    // --- public queries --------------------------------------------------

    /// Models enabled for MCP access. Empty in YOLO mode, where the tool
    /// layer enumerates `ir.model` directly.
    pub async fn get_enabled_models(&self) -> Result<Vec<EnabledModel>, ServiceError> {
        if self.config.yolo_mode.is_enabled() {
            return Ok(Vec::new());
        }

        let body = self
            .fetch_cached(self.config.endpoint_paths().mcp_models)
            .await?;
        let models = body["data"]["models"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let model = item["model"].as_str()?.to_string();
                        let name = item["name"].as_str().unwrap_or(&model).to_string();
                        Some(EnabledModel { model, name })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    pub async fn is_model_enabled(&self, model: &str) -> bool {
        if self.config.yolo_mode.is_enabled() {
            return true;
        }
        match self.get_model_permissions(model).await {
            Ok(perms) => perms.enabled,
            Err(_) => false,
        }
    }

    /// Permission matrix for one model.
    pub async fn get_model_permissions(
        &self,
        model: &str,
    ) -> Result<ModelPermissions, ServiceError> {
        if self.config.yolo_mode.is_enabled() {
            return Ok(ModelPermissions::yolo(model, self.config.yolo_mode));
        }

        let path = self.config.endpoint_paths().model_permissions(model);
        let body = self.fetch_cached(&path).await?;
        Ok(ModelPermissions::from_rest(model, &body["data"]))
    }

    /// The two-value decision every gate goes through.
    pub async fn check_operation_allowed(
        &self,
        model: &str,
        operation: &str,
    ) -> (bool, Option<String>) {
        match self.config.yolo_mode {
            YoloMode::Read => {
                if operation == "read" {
                    (true, None)
                } else {
                    (
                        false,
                        Some(format!(
                            "YOLO read-only mode blocks '{operation}' operations"
                        )),
                    )
                }
            }
            YoloMode::True => (true, None),
            YoloMode::Off => match self.get_model_permissions(model).await {
                Ok(perms) if !perms.enabled => (
                    false,
                    Some(format!("Model '{model}' is not enabled for MCP access")),
                ),
                Ok(perms) if !perms.can_perform(operation) => (
                    false,
                    Some(format!(
                        "Operation '{operation}' not allowed on model '{model}'"
                    )),
                ),
                Ok(_) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            },
        }
    }

    /// Gate an operation, or report why it is denied.
    ///
    /// # Errors
    ///
    /// [`AccessDenied`] with the denial reason.
    pub async fn validate_model_access(
        &self,
        model: &str,
        operation: &str,
    ) -> Result<(), AccessDenied> {
        let (allowed, reason) = self.check_operation_allowed(model, operation).await;
        if allowed {
            Ok(())
        } else {
            Err(AccessDenied(reason.unwrap_or_else(|| {
                format!("Operation '{operation}' denied on model '{model}'")
            })))
        }
    }

    /// Keep only the models enabled for MCP access.
    pub async fn filter_enabled_models(&self, models: Vec<String>) -> Vec<String> {
        let mut enabled = Vec::with_capacity(models.len());
        for model in models {
            if self.is_model_enabled(&model).await {
                enabled.push(model);
            }
        }
        enabled
    }

    /// Permission matrices for every enabled model.
    pub async fn get_all_permissions(
        &self,
    ) -> Result<HashMap<String, ModelPermissions>, ServiceError> {
        let mut all = HashMap::new();
        for entry in self.get_enabled_models().await? {
            if let Ok(perms) = self.get_model_permissions(&entry.model).await {
                all.insert(entry.model, perms);
            }
        }
        Ok(all)
    }

    // --- REST plumbing ---------------------------------------------------

    async fn fetch_cached(&self, path: &str) -> Result<Value, ServiceError> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(path) {
                if entry.cached_at.elapsed() < CACHE_TTL {
                    return Ok(entry.value.clone());
                }
            }
        }

        let value = self.request_with_auth(path).await?;
        self.cache.lock().insert(
            path.to_string(),
            CacheEntry {
                value: value.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(value)
    }

    async fn request_with_auth(&self, path: &str) -> Result<Value, ServiceError> {
        let response = self.send(path).await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED && !self.config.uses_api_key() {
            // Stale or missing session cookie: re-authenticate and retry once.
            *self.session_id.lock() = None;
            let retry = self.send(path).await?;
            return Self::parse_response(path, retry).await;
        }

        Self::parse_response(path, response).await
    }

    async fn parse_response(path: &str, response: reqwest::Response) -> Result<Value, ServiceError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ServiceError::Authentication(
                "Odoo rejected the MCP REST credentials".into(),
            ));
        }
        if !status.is_success() {
            return Err(ServiceError::connection(format!(
                "GET {path} returned HTTP {}",
                status.as_u16()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::connection(format!("Invalid response from {path}: {e}")))
    }

    async fn send(&self, path: &str) -> Result<reqwest::Response, ServiceError> {
        let url = format!("{}{}", self.config.base_url(), path);
        let mut request = self.http.get(&url);

        if let Some(database) = self.database.lock().clone() {
            request = request.header("X-Odoo-Database", database);
        }

        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        } else {
            let session = self.ensure_session().await?;
            request = request.header("Cookie", format!("session_id={session}"));
        }

        request
            .send()
            .await
            .map_err(|e| ServiceError::connection(format!("GET {path} failed: {e}")))
    }

    /// Authenticate a web session and cache the cookie.
    async fn ensure_session(&self) -> Result<String, ServiceError> {
        if let Some(session) = self.session_id.lock().clone() {
            return Ok(session);
        }

        let (Some(username), Some(password)) = (&self.config.username, &self.config.password)
        else {
            return Err(ServiceError::Authentication(
                "Session authentication failed: invalid credentials".into(),
            ));
        };

        let url = format!(
            "{}{}",
            self.config.base_url(),
            self.config.endpoint_paths().web_session
        );
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "params": {
                "db": self.database.lock().clone(),
                "login": username,
                "password": password,
            },
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::connection(format!("Session authentication failed: {e}")))?;

        let session = extract_session_cookie(response.headers());

        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if payload.get("error").is_some() || session.is_none() {
            return Err(ServiceError::Authentication(
                "Session authentication failed: invalid credentials".into(),
            ));
        }

        let session = session.unwrap_or_default();
        *self.session_id.lock() = Some(session.clone());
        tracing::debug!("obtained Odoo web session for MCP REST calls");
        Ok(session)
    }
}

/// Pull `session_id` out of the `Set-Cookie` headers.
fn extract_session_cookie(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            let (name, rest) = cookie.split_once('=')?;
            if name.trim() == "session_id" {
                Some(rest.split(';').next().unwrap_or(rest).trim().to_string())
            } else {
                None
            }
        })
}
