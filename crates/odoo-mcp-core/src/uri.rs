//! `odoo://` resource URI codec.
//!
//! URIs take the shape `odoo://<model>/<op>[/<id>][?k=v&...]` where the
//! operation is one of `record/{id}`, `search`, `browse`, `count`,
//! `fields`, or nothing at all (bare model info). Query keys are drawn
//! from `domain`, `fields`, `limit`, `offset`, `order`, `ids`.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::error::ServiceError;

/// Everything except RFC 3986 unreserved characters gets percent-encoded.
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A resource operation addressed by a URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOp {
    /// Bare `odoo://{model}`: short model info page.
    Info,
    /// `record/{id}` retrieval.
    Record(i64),
    Search,
    Browse,
    Count,
    Fields,
}

impl ResourceOp {
    /// The path segment(s) after the model.
    pub fn as_path(&self) -> String {
        match self {
            Self::Info => String::new(),
            Self::Record(id) => format!("record/{id}"),
            Self::Search => "search".into(),
            Self::Browse => "browse".into(),
            Self::Count => "count".into(),
            Self::Fields => "fields".into(),
        }
    }
}

impl fmt::Display for ResourceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_path())
    }
}

/// A parsed `odoo://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    pub model: String,
    pub op: ResourceOp,
    pub params: BTreeMap<String, String>,
}

/// Check a model name against `[a-z_][a-z0-9_.]*`.
pub fn is_valid_model_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
}

/// Parse an `odoo://` URI into model, operation, and query parameters.
///
/// When `enabled_models` is supplied, a model outside the list is rejected
/// with a validation error.
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] on a malformed scheme, model name,
/// operation, or record id.
pub fn parse_uri(uri: &str, enabled_models: Option<&[String]>) -> Result<ParsedUri, ServiceError> {
    let rest = uri
        .strip_prefix("odoo://")
        .ok_or_else(|| ServiceError::validation(format!("Invalid URI format: {uri}")))?;

    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };

    let mut segments = path.trim_end_matches('/').splitn(3, '/');
    let model = segments.next().unwrap_or_default().to_string();
    if !is_valid_model_name(&model) {
        return Err(ServiceError::validation(format!(
            "Invalid model name in URI: {uri}"
        )));
    }
    if let Some(enabled) = enabled_models {
        if !enabled.iter().any(|m| m == &model) {
            return Err(ServiceError::validation(format!(
                "Model '{model}' is not enabled for MCP access"
            )));
        }
    }

    let op = match segments.next() {
        None | Some("") => ResourceOp::Info,
        Some("search") => ResourceOp::Search,
        Some("browse") => ResourceOp::Browse,
        Some("count") => ResourceOp::Count,
        Some("fields") => ResourceOp::Fields,
        Some("record") => {
            let raw_id = segments.next().ok_or_else(|| {
                ServiceError::validation(format!("Missing record ID in URI: {uri}"))
            })?;
            let id: i64 = raw_id.parse().map_err(|_| {
                ServiceError::validation(format!("Invalid record ID '{raw_id}' in URI: {uri}"))
            })?;
            if id <= 0 {
                return Err(ServiceError::validation(format!(
                    "Record ID must be a positive integer, got {id}"
                )));
            }
            ResourceOp::Record(id)
        }
        Some(other) => {
            return Err(ServiceError::validation(format!(
                "Unknown operation '{other}' in URI: {uri}"
            )))
        }
    };

    let mut params = BTreeMap::new();
    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = percent_decode_str(key).decode_utf8_lossy().into_owned();
            let value = percent_decode_str(value).decode_utf8_lossy().into_owned();
            params.insert(key, value);
        }
    }

    Ok(ParsedUri { model, op, params })
}

/// Build an `odoo://` URI from parts.
///
/// List and object parameter values are JSON-encoded before percent
/// encoding so they round-trip through [`parse_uri`].
pub fn build_resource_uri(
    model: &str,
    op: &ResourceOp,
    params: &BTreeMap<String, Value>,
) -> String {
    let mut uri = format!("odoo://{model}");
    let path = op.as_path();
    if !path.is_empty() {
        uri.push('/');
        uri.push_str(&path);
    }

    if params.is_empty() {
        return uri;
    }

    let query: Vec<String> = params
        .iter()
        .map(|(key, value)| {
            let raw = match value {
                Value::String(s) => s.clone(),
                Value::Array(_) | Value::Object(_) => value.to_string(),
                other => other.to_string(),
            };
            format!("{key}={}", utf8_percent_encode(&raw, QUERY_ENCODE))
        })
        .collect();

    format!("{uri}?{}", query.join("&"))
}
