//! Search-domain parsing and normalization.
//!
//! An Odoo domain is a flat prefix-notation sequence whose items are either
//! a `[field, operator, value]` triple or one of the logical operators
//! `"&"`, `"|"`, `"!"`. Clients send domains as JSON or as Python-literal
//! text (`[('is_company', '=', True)]`); the parser is strict-JSON-first
//! with a tokenizing fallback that rewrites the Python form into JSON.
//! There is no evaluator anywhere in this path.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ServiceError;

/// One element of a search domain.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainItem {
    /// Prefix logical operator: `&`, `|`, or `!`.
    Logic(char),
    /// A `[field, operator, value]` condition.
    Condition {
        field: String,
        operator: String,
        value: Value,
    },
}

impl DomainItem {
    /// Convenience constructor for a condition.
    pub fn condition(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self::Condition {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Logic(op) => Value::String(op.to_string()),
            Self::Condition {
                field,
                operator,
                value,
            } => Value::Array(vec![
                Value::String(field.clone()),
                Value::String(operator.clone()),
                value.clone(),
            ]),
        }
    }
}

/// An ordered search domain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Domain(pub Vec<DomainItem>);

impl Domain {
    /// The empty domain (matches everything).
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Parse domain text: JSON first, then the Python-literal fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] when neither syntax yields a
    /// structurally valid domain.
    pub fn parse(text: &str) -> Result<Self, ServiceError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }

        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Self::from_json(&value);
        }

        let normalized = normalize_python_literal(trimmed);
        let value = serde_json::from_str::<Value>(&normalized)
            .map_err(|_| ServiceError::validation(format!("Invalid domain format: {text}")))?;
        Self::from_json(&value)
    }

    /// Validate a JSON value as a domain.
    pub fn from_json(value: &Value) -> Result<Self, ServiceError> {
        let items = value
            .as_array()
            .ok_or_else(|| ServiceError::validation("Domain must be a list"))?;

        let mut domain = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(op) => match op.as_str() {
                    "&" | "|" | "!" => domain.push(DomainItem::Logic(op.chars().next().unwrap())),
                    other => {
                        return Err(ServiceError::validation(format!(
                            "Invalid logical operator in domain: '{other}'"
                        )))
                    }
                },
                Value::Array(parts) => {
                    if parts.len() != 3 {
                        return Err(ServiceError::validation(
                            "Each domain condition must be a 3-element list",
                        ));
                    }
                    let field = parts[0].as_str().ok_or_else(|| {
                        ServiceError::validation("Domain condition field must be a string")
                    })?;
                    let operator = parts[1].as_str().ok_or_else(|| {
                        ServiceError::validation("Domain condition operator must be a string")
                    })?;
                    domain.push(DomainItem::Condition {
                        field: field.to_string(),
                        operator: operator.to_string(),
                        value: parts[2].clone(),
                    });
                }
                _ => {
                    return Err(ServiceError::validation(
                        "Each domain condition must be a 3-element list",
                    ))
                }
            }
        }
        Ok(Self(domain))
    }

    /// JSON form used on the wire.
    pub fn to_json(&self) -> Value {
        Value::Array(self.0.iter().map(DomainItem::to_json).collect())
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("[]")
        } else {
            f.write_str(&self.to_json().to_string())
        }
    }
}

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(|e| D::Error::custom(e.to_string()))
    }
}

impl From<Vec<DomainItem>> for Domain {
    fn from(items: Vec<DomainItem>) -> Self {
        Self(items)
    }
}

/// Rewrite Python-literal domain text into JSON.
///
/// Handles single-quoted strings, tuple parentheses, and the `True` /
/// `False` / `None` keywords. Double-quoted strings pass through verbatim.
fn normalize_python_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                // Copy a double-quoted string as-is.
                out.push('"');
                while let Some(c) = chars.next() {
                    out.push(c);
                    if c == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if c == '"' {
                        break;
                    }
                }
            }
            '\'' => {
                // Convert a single-quoted string to double quotes.
                out.push('"');
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(escaped) => {
                                out.push('\\');
                                out.push(escaped);
                            }
                            None => break,
                        },
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            '(' => out.push('['),
            ')' => out.push(']'),
            c if c.is_ascii_alphabetic() => {
                let mut word = String::new();
                word.push(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    other => out.push_str(other),
                }
            }
            other => out.push(other),
        }
    }

    out
}
