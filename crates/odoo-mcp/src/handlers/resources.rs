//! Resource URI dispatch.
//!
//! Each `odoo://` operation maps to a handler returning formatted text.
//! All of them require an authenticated session, gate through access
//! control, and project reads onto safe fields (no binary/html/serialized
//! payloads, no underscore-prefixed internals).

use std::sync::Arc;

use serde_json::Value;

use odoo_mcp_core::{Config, Domain, DomainItem, ParsedUri, ResourceOp, ServiceError};

use crate::access::AccessController;
use crate::connection::Connection;
use crate::formatter::{format_field_list, format_record, format_search_results, FormatterRegistry};
use crate::handlers::access_denied;

/// Field types whose values never belong in text output.
const UNSAFE_FIELD_TYPES: [&str; 3] = ["binary", "html", "serialized"];

pub struct ResourceHandler {
    connection: Arc<Connection>,
    access: Arc<AccessController>,
    config: Arc<Config>,
    registry: FormatterRegistry,
}

impl ResourceHandler {
    pub fn new(
        connection: Arc<Connection>,
        access: Arc<AccessController>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            connection,
            access,
            config,
            registry: FormatterRegistry::new(),
        }
    }

    /// Parse and dispatch a resource URI.
    pub async fn read_uri(&self, uri: &str) -> Result<String, ServiceError> {
        let parsed = odoo_mcp_core::parse_uri(uri, None)?;
        self.dispatch(parsed).await
    }

    async fn dispatch(&self, parsed: ParsedUri) -> Result<String, ServiceError> {
        self.require_auth()?;
        let ParsedUri { model, op, params } = parsed;

        let result = match op {
            ResourceOp::Info => Ok(self.model_info(&model)),
            ResourceOp::Record(id) => self.record_retrieval(&model, id).await,
            ResourceOp::Search => {
                self.search(
                    &model,
                    params.get("domain").map(String::as_str),
                    params.get("fields").map(String::as_str),
                    params.get("limit").map(String::as_str),
                    params.get("offset").map(String::as_str),
                    params.get("order").map(String::as_str),
                )
                .await
            }
            ResourceOp::Browse => {
                self.browse(&model, params.get("ids").map(String::as_str).unwrap_or(""))
                    .await
            }
            ResourceOp::Count => {
                self.count(&model, params.get("domain").map(String::as_str))
                    .await
            }
            ResourceOp::Fields => self.fields(&model).await,
        };

        result.map_err(rewrap_connection)
    }

    /// Short usage page for a bare `odoo://{model}` URI.
    fn model_info(&self, model: &str) -> String {
        format!(
            "# {model}\n\nModel in Odoo instance at {base}\n\nUse resources:\n\
             - odoo://{model}/fields - Get field information\n\
             - odoo://{model}/count - Count records\n\
             - odoo://{model}/search - Search records\n\
             - odoo://{model}/browse - Browse specific records\n\
             - odoo://{model}/record/<id> - Get a specific record",
            base = self.config.base_url()
        )
    }

    /// `odoo://{model}/record/{id}`
    pub async fn record_retrieval(&self, model: &str, id: i64) -> Result<String, ServiceError> {
        if id <= 0 {
            return Err(ServiceError::validation(format!(
                "Record ID must be a positive integer, got {id}"
            )));
        }
        self.validate_access(model, "read").await?;

        // Cheap existence probe before pulling the whole record.
        let domain = Domain::from(vec![DomainItem::condition("id", "=", id)]);
        let found = self.connection.search(model, &domain, None, None, None).await?;
        if found.is_empty() {
            return Err(ServiceError::not_found(format!(
                "Record not found: {model} #{id}"
            )));
        }

        let safe = self.safe_fields(model).await?;
        let records = self.connection.read(model, &[id], safe.as_deref()).await?;
        let record = records.first().ok_or_else(|| {
            ServiceError::not_found(format!("Record not found: {model} #{id}"))
        })?;

        let fields_info = self.connection.fields_get(model, None).await?;
        Ok(format_record(&self.registry, model, record, &fields_info))
    }

    /// `odoo://{model}/search`
    pub async fn search(
        &self,
        model: &str,
        domain: Option<&str>,
        fields: Option<&str>,
        limit: Option<&str>,
        offset: Option<&str>,
        order: Option<&str>,
    ) -> Result<String, ServiceError> {
        self.validate_access(model, "read").await?;

        let domain = Domain::parse(domain.unwrap_or(""))?;
        let limit = self.clamp_limit(limit.and_then(|raw| raw.parse::<u32>().ok()));
        let offset = offset.and_then(|raw| raw.parse::<u32>().ok()).unwrap_or(0);
        let fields = fields.map(parse_field_list).filter(|f| !f.is_empty());

        let total = self.connection.search_count(model, &domain).await?;
        let records = self
            .connection
            .search_read(model, &domain, fields.as_deref(), Some(limit), Some(offset), order)
            .await?;

        Ok(format_search_results(
            model, &records, total, limit, offset, &domain,
        ))
    }

    /// `odoo://{model}/browse?ids=1,2,3`
    pub async fn browse(&self, model: &str, csv_ids: &str) -> Result<String, ServiceError> {
        let mut ids: Vec<i64> = csv_ids
            .split(',')
            .filter_map(|token| token.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .collect();
        if ids.is_empty() {
            return Err(ServiceError::validation("No valid IDs provided"));
        }

        self.validate_access(model, "read").await?;

        let max = self.config.max_limit as usize;
        let truncated = ids.len() > max;
        if truncated {
            ids.truncate(max);
        }

        let safe = self.safe_fields(model).await?;
        let records = self.connection.read(model, &ids, safe.as_deref()).await?;

        let found: Vec<i64> = records
            .iter()
            .filter_map(|r| r["id"].as_i64())
            .collect();
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !found.contains(id))
            .map(|id| id.to_string())
            .collect();

        let mut out = format_search_results(
            model,
            &records,
            records.len() as i64,
            records.len().max(1) as u32,
            0,
            &Domain::empty(),
        );
        if !missing.is_empty() {
            out.push_str(&format!("\n\nMissing IDs: {}", missing.join(", ")));
        }
        if truncated {
            out.push_str(&format!(
                "\n\nNote: Results truncated to {} records.",
                self.config.max_limit
            ));
        }
        Ok(out)
    }

    /// `odoo://{model}/count`
    pub async fn count(&self, model: &str, domain: Option<&str>) -> Result<String, ServiceError> {
        self.validate_access(model, "read").await?;

        let domain = Domain::parse(domain.unwrap_or(""))?;
        let count = self.connection.search_count(model, &domain).await?;

        let mut out = format!("Total count: {count} record(s)");
        if !domain.is_empty() {
            out.push_str(&format!("\nDomain: {domain}"));
        }
        Ok(out)
    }

    /// `odoo://{model}/fields`
    pub async fn fields(&self, model: &str) -> Result<String, ServiceError> {
        self.validate_access(model, "read").await?;
        let fields_info = self.connection.fields_get(model, None).await?;
        Ok(format_field_list(model, &fields_info))
    }

    // --- shared plumbing -------------------------------------------------

    fn require_auth(&self) -> Result<(), ServiceError> {
        if self.connection.is_authenticated() {
            Ok(())
        } else {
            Err(ServiceError::validation("Not authenticated with Odoo"))
        }
    }

    async fn validate_access(&self, model: &str, op: &str) -> Result<(), ServiceError> {
        self.access
            .validate_model_access(model, op)
            .await
            .map_err(access_denied)
    }

    /// Fields safe to project in text output, or `None` for degenerate
    /// models where the filter would leave nothing.
    async fn safe_fields(&self, model: &str) -> Result<Option<Vec<String>>, ServiceError> {
        let fields_info = self.connection.fields_get(model, None).await?;
        let Some(map) = fields_info.as_object() else {
            return Ok(None);
        };

        let safe: Vec<String> = map
            .iter()
            .filter(|(name, info)| {
                let field_type = info["type"].as_str().unwrap_or("char");
                !name.starts_with('_') && !UNSAFE_FIELD_TYPES.contains(&field_type)
            })
            .map(|(name, _)| name.clone())
            .collect();

        Ok(if safe.is_empty() { None } else { Some(safe) })
    }

    fn clamp_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit)
    }
}

/// Resource handlers surface connection failures as 400s.
fn rewrap_connection(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::Connection(msg) => {
            ServiceError::validation(format!("Connection error: {msg}"))
        }
        other => other,
    }
}

/// Fields given as a JSON list or as CSV text.
fn parse_field_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
            return items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}
