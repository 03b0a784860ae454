//! Structured CRUD tools.
//!
//! These are the typed counterparts of the resource handlers: instead of
//! formatted text they return result envelopes that serialize into the
//! tool's structured content. Mutations gate through access control before
//! any RPC is dispatched.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use odoo_mcp_core::text::model_display_name;
use odoo_mcp_core::{Config, Domain, ServiceError, YoloMode};

use crate::access::AccessController;
use crate::connection::Connection;
use crate::handlers::access_denied;
use crate::protocol::{JsonRpcNotification, ResourceTemplate};

/// Cap on the smart-default field selection.
const SMART_FIELD_CAP: usize = 15;

/// Common columns worth returning when the caller picks no fields.
const COMMON_FIELDS: [&str; 14] = [
    "email",
    "phone",
    "mobile",
    "street",
    "city",
    "state",
    "date",
    "date_order",
    "amount_total",
    "partner_id",
    "user_id",
    "company_id",
    "ref",
    "active",
];

/// Models kept in YOLO `list_models` output despite their prefix.
const YOLO_MODEL_ALLOWLIST: [&str; 1] = ["ir.attachment"];

// --- logging context -----------------------------------------------------

/// Non-blocking log/progress sink handed to every tool invocation.
///
/// A failing sink must never fail the tool: sends are fire-and-forget and
/// fall back to tracing.
#[derive(Clone, Default)]
pub struct LogContext {
    sender: Option<tokio::sync::mpsc::UnboundedSender<JsonRpcNotification>>,
    progress_token: Option<Value>,
}

impl LogContext {
    /// A context that only logs via tracing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<JsonRpcNotification>) -> Self {
        Self {
            sender: Some(sender),
            progress_token: None,
        }
    }

    pub fn with_progress_token(mut self, token: Value) -> Self {
        self.progress_token = Some(token);
        self
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        if let Some(sender) = &self.sender {
            let _ = sender.send(JsonRpcNotification::log("info", message));
        }
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        if let Some(sender) = &self.sender {
            let _ = sender.send(JsonRpcNotification::log("warning", message));
        }
    }

    pub fn progress(&self, progress: f64, total: Option<f64>) {
        let (Some(sender), Some(token)) = (&self.sender, &self.progress_token) else {
            return;
        };
        let _ = sender.send(JsonRpcNotification::progress(token.clone(), progress, total));
    }
}

// --- result envelopes ----------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub model: String,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
    pub records: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordResult {
    pub success: bool,
    pub record: Value,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordMetadata {
    pub field_selection_method: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub id: i64,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateResult {
    pub success: bool,
    pub record: RecordSummary,
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    pub success: bool,
    pub record: RecordSummary,
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub success: bool,
    pub deleted_id: i64,
    pub display_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelsResult {
    pub models: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yolo_mode: Option<Value>,
}

// --- the handler ---------------------------------------------------------

pub struct ToolHandler {
    connection: Arc<Connection>,
    access: Arc<AccessController>,
    config: Arc<Config>,
}

impl ToolHandler {
    pub fn new(
        connection: Arc<Connection>,
        access: Arc<AccessController>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            connection,
            access,
            config,
        }
    }

    /// `search_records`: parameterized search with a structured reply.
    #[allow(clippy::too_many_arguments)]
    pub async fn search_records(
        &self,
        model: &str,
        domain: Option<&Value>,
        fields: Option<&Value>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<&str>,
        ctx: &LogContext,
    ) -> Result<SearchResult, ServiceError> {
        self.validate_access(model, "read").await?;

        let domain = parse_domain_value(domain)?;
        let fields = parse_fields_value(fields, ctx);
        let limit = self.clamp_limit(limit);
        let offset = offset.unwrap_or(0).max(0) as u32;

        let total = self.connection.search_count(model, &domain).await?;
        let records = self
            .connection
            .search_read(model, &domain, fields.as_deref(), Some(limit), Some(offset), order)
            .await?;

        ctx.info(format!(
            "search_records: {model} matched {total} record(s), returning {}",
            records.len()
        ));

        Ok(SearchResult {
            model: model.to_string(),
            total,
            limit,
            offset,
            records,
        })
    }

    /// `get_record`: one record with smart-default or explicit fields.
    pub async fn get_record(
        &self,
        model: &str,
        record_id: i64,
        fields: Option<Vec<String>>,
        _ctx: &LogContext,
    ) -> Result<RecordResult, ServiceError> {
        if record_id <= 0 {
            return Err(ServiceError::validation(format!(
                "Record ID must be a positive integer, got {record_id}"
            )));
        }
        self.validate_access(model, "read").await?;

        let (selected, method) = match fields.filter(|f| !f.is_empty()) {
            Some(explicit) => (explicit, "explicit"),
            None => (self.smart_default_fields(model).await?, "smart_defaults"),
        };

        let records = self
            .connection
            .read(model, &[record_id], Some(&selected))
            .await?;
        let record = records.into_iter().next().ok_or_else(|| {
            ServiceError::not_found(format!("Record not found: {model} #{record_id}"))
        })?;

        Ok(RecordResult {
            success: true,
            record,
            metadata: RecordMetadata {
                field_selection_method: method.to_string(),
            },
        })
    }

    /// `list_models`: enabled models with their permission matrix.
    ///
    /// Standard mode asks the ERP's MCP REST surface. YOLO mode bypasses it
    /// and enumerates `ir.model` directly; the envelope is the same shape
    /// either way, with an extra `yolo_mode` block in bypass mode.
    pub async fn list_models(&self) -> Result<ModelsResult, ServiceError> {
        if self.config.yolo_mode.is_enabled() {
            return self.list_models_yolo().await;
        }

        let mut models = Vec::new();
        for entry in self.access.get_enabled_models().await? {
            let perms = self.access.get_model_permissions(&entry.model).await?;
            models.push(json!({
                "model": entry.model,
                "name": entry.name,
                "operations": {
                    "read": perms.can_read,
                    "write": perms.can_write,
                    "create": perms.can_create,
                    "unlink": perms.can_unlink,
                },
            }));
        }

        Ok(ModelsResult {
            models,
            yolo_mode: None,
        })
    }

    async fn list_models_yolo(&self) -> Result<ModelsResult, ServiceError> {
        let domain = Domain::parse(r#"[["transient", "=", false]]"#)?;
        let fields = ["model".to_string(), "name".to_string()];
        let raw = self
            .connection
            .search_read("ir.model", &domain, Some(&fields), None, None, Some("model"))
            .await?;

        let read_only = self.config.yolo_mode == YoloMode::Read;
        let models: Vec<Value> = raw
            .iter()
            .filter_map(|item| {
                let model = item["model"].as_str()?;
                let keep = YOLO_MODEL_ALLOWLIST.contains(&model)
                    || (!model.starts_with("ir.") && !model.starts_with("base."));
                if !keep {
                    return None;
                }
                let name = item["name"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| model_display_name(model));
                Some(json!({
                    "model": model,
                    "name": name,
                    "operations": {
                        "read": true,
                        "write": !read_only,
                        "create": !read_only,
                        "unlink": !read_only,
                    },
                }))
            })
            .collect();

        Ok(ModelsResult {
            models,
            yolo_mode: Some(json!({
                "enabled": true,
                "level": self.config.yolo_mode.level(),
                "operations": {
                    "read": true,
                    "write": !read_only,
                    "create": !read_only,
                    "unlink": !read_only,
                },
            })),
        })
    }

    /// `create_record`
    pub async fn create_record(
        &self,
        model: &str,
        values: Map<String, Value>,
        ctx: &LogContext,
    ) -> Result<CreateResult, ServiceError> {
        if values.is_empty() {
            return Err(ServiceError::validation("Values cannot be empty"));
        }
        self.validate_access(model, "create").await?;

        let id = self.connection.create(model, values).await?;
        let display_name = self.display_name_of(model, id).await;
        ctx.info(format!("created {model} record #{id}"));

        Ok(CreateResult {
            success: true,
            record: RecordSummary {
                id,
                display_name: display_name.clone(),
            },
            url: self.connection.build_record_url(model, id),
            message: format!("Successfully created {model} record {display_name}"),
        })
    }

    /// `update_record`
    pub async fn update_record(
        &self,
        model: &str,
        record_id: i64,
        values: Map<String, Value>,
        ctx: &LogContext,
    ) -> Result<UpdateResult, ServiceError> {
        if values.is_empty() {
            return Err(ServiceError::validation("Values cannot be empty"));
        }

        let exists = self
            .connection
            .read(model, &[record_id], Some(&["id".to_string()]))
            .await?;
        if exists.is_empty() {
            return Err(ServiceError::not_found(format!(
                "Record not found: {model} #{record_id}"
            )));
        }

        self.validate_access(model, "write").await?;
        self.connection.write(model, &[record_id], values).await?;
        let display_name = self.display_name_of(model, record_id).await;
        ctx.info(format!("updated {model} record #{record_id}"));

        Ok(UpdateResult {
            success: true,
            record: RecordSummary {
                id: record_id,
                display_name: display_name.clone(),
            },
            url: self.connection.build_record_url(model, record_id),
            message: format!("Successfully updated {model} record {display_name}"),
        })
    }

    /// `delete_record`
    pub async fn delete_record(
        &self,
        model: &str,
        record_id: i64,
        ctx: &LogContext,
    ) -> Result<DeleteResult, ServiceError> {
        // Pre-fetch doubles as the existence check and feeds the response.
        let fields = ["id".to_string(), "display_name".to_string()];
        let records = self
            .connection
            .read(model, &[record_id], Some(&fields))
            .await?;
        let record = records.first().ok_or_else(|| {
            ServiceError::not_found(format!("Record not found: {model} #{record_id}"))
        })?;
        let display_name = record["display_name"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Record #{record_id}"));

        self.validate_access(model, "unlink").await?;
        self.connection.unlink(model, &[record_id]).await?;
        ctx.info(format!("deleted {model} record #{record_id}"));

        Ok(DeleteResult {
            success: true,
            deleted_id: record_id,
            display_name: display_name.clone(),
            message: format!("Successfully deleted {model} record {display_name}"),
        })
    }

    /// `list_resource_templates`: client-side introspection.
    pub fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        let template = |uri: &str, name: &str, description: &str| ResourceTemplate {
            uri_template: uri.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            mime_type: Some("text/plain".into()),
        };

        vec![
            template(
                "odoo://{model}",
                "Model information",
                "Overview of a model and its operation URIs",
            ),
            template(
                "odoo://{model}/record/{record_id}",
                "Record retrieval",
                "A single record rendered field by field",
            ),
            template(
                "odoo://{model}/search",
                "Record search",
                "Search with domain, fields, limit, offset, and order query parameters",
            ),
            template(
                "odoo://{model}/browse",
                "Record browse",
                "Fetch specific records by a comma-separated ids query parameter",
            ),
            template(
                "odoo://{model}/count",
                "Record count",
                "Count records matching a domain query parameter",
            ),
            template(
                "odoo://{model}/fields",
                "Field catalogue",
                "Field definitions grouped by type",
            ),
        ]
    }

    // --- shared plumbing -------------------------------------------------

    async fn validate_access(&self, model: &str, op: &str) -> Result<(), ServiceError> {
        self.access
            .validate_model_access(model, op)
            .await
            .map_err(access_denied)
    }

    async fn display_name_of(&self, model: &str, id: i64) -> String {
        let fields = ["display_name".to_string()];
        match self.connection.read(model, &[id], Some(&fields)).await {
            Ok(records) => records
                .first()
                .and_then(|r| r["display_name"].as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Record #{id}")),
            Err(_) => format!("Record #{id}"),
        }
    }

    /// A compact field selection for `get_record` without explicit fields:
    /// the name-ish columns, a handful of common ones, then simple
    /// many2one `*_id` fields, capped at fifteen.
    async fn smart_default_fields(&self, model: &str) -> Result<Vec<String>, ServiceError> {
        let fields_info = self.connection.fields_get(model, None).await?;
        let Some(map) = fields_info.as_object() else {
            return Ok(Vec::new());
        };

        let mut selected: Vec<String> = Vec::new();
        let mut push = |name: &str, selected: &mut Vec<String>| {
            if selected.len() < SMART_FIELD_CAP && !selected.iter().any(|s| s == name) {
                selected.push(name.to_string());
            }
        };

        for name in ["name", "display_name", "code"] {
            if map.contains_key(name) {
                push(name, &mut selected);
            }
        }
        for name in COMMON_FIELDS {
            if map.contains_key(name) {
                push(name, &mut selected);
            }
        }
        for (name, info) in map {
            if name.ends_with("_id") && info["type"].as_str() == Some("many2one") {
                push(name, &mut selected);
            }
        }

        Ok(selected)
    }

    fn clamp_limit(&self, requested: Option<i64>) -> u32 {
        let requested = requested
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(self.config.default_limit);
        requested.clamp(1, self.config.max_limit)
    }
}

/// Domain given as a JSON string, a Python-literal string, or a native list.
fn parse_domain_value(raw: Option<&Value>) -> Result<Domain, ServiceError> {
    match raw {
        None | Some(Value::Null) => Ok(Domain::empty()),
        Some(Value::String(text)) => Domain::parse(text),
        Some(list @ Value::Array(_)) => Domain::from_json(list),
        Some(other) => Err(ServiceError::validation(format!(
            "Invalid domain format: {other}"
        ))),
    }
}

/// Fields given as a CSV string, a JSON string, or a native list.
///
/// The `__all__` sentinel means "no projection" and earns a warning: full
/// records on wide models are expensive.
fn parse_fields_value(raw: Option<&Value>, ctx: &LogContext) -> Option<Vec<String>> {
    let fields: Vec<String> = match raw {
        None | Some(Value::Null) => return None,
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed.starts_with('[') {
                serde_json::from_str::<Vec<String>>(trimmed)
                    .unwrap_or_else(|_| csv_fields(trimmed))
            } else {
                csv_fields(trimmed)
            }
        }
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(_) => return None,
    };

    if fields.iter().any(|f| f == "__all__") {
        ctx.warning(
            "Requesting all fields (__all__) can be slow on wide models; consider an explicit field list",
        );
        return None;
    }
    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

fn csv_fields(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_value_variants() {
        assert!(parse_domain_value(None).unwrap().is_empty());
        assert!(parse_domain_value(Some(&Value::Null)).unwrap().is_empty());

        let from_json_string =
            parse_domain_value(Some(&json!(r#"[["is_company", "=", true]]"#))).unwrap();
        assert_eq!(from_json_string.len(), 1);

        let from_python_string =
            parse_domain_value(Some(&json!("[('is_company', '=', True)]"))).unwrap();
        assert_eq!(from_python_string, from_json_string);

        let native = parse_domain_value(Some(&json!([["is_company", "=", true]]))).unwrap();
        assert_eq!(native, from_json_string);

        assert!(parse_domain_value(Some(&json!(42))).is_err());
    }

    #[test]
    fn fields_value_variants() {
        let ctx = LogContext::disabled();
        assert_eq!(parse_fields_value(None, &ctx), None);
        assert_eq!(
            parse_fields_value(Some(&json!("name,email")), &ctx),
            Some(vec!["name".to_string(), "email".to_string()])
        );
        assert_eq!(
            parse_fields_value(Some(&json!(r#"["name", "email"]"#)), &ctx),
            Some(vec!["name".to_string(), "email".to_string()])
        );
        assert_eq!(
            parse_fields_value(Some(&json!(["name"])), &ctx),
            Some(vec!["name".to_string()])
        );
    }

    #[test]
    fn all_sentinel_disables_projection() {
        let ctx = LogContext::disabled();
        assert_eq!(parse_fields_value(Some(&json!(["__all__"])), &ctx), None);
    }

    #[test]
    fn log_context_swallows_closed_channel() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let ctx = LogContext::new(tx).with_progress_token(json!("tok"));
        // Receiver is gone; none of these may panic or error.
        ctx.info("hello");
        ctx.warning("careful");
        ctx.progress(0.5, Some(1.0));
    }
}
