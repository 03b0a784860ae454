//! Human-readable rendering of Odoo field values and records.
//!
//! A registry maps Odoo field type tags to formatter functions; relational
//! formatters additionally receive the model's `fields_get` metadata so
//! they can embed `odoo://` URIs for the related model. Unknown types fall
//! back to a literal rendering.

use std::collections::HashMap;

use serde_json::Value;

use odoo_mcp_core::text::sanitize_str;

/// Everything a formatter needs about one field.
pub struct FieldContext<'a> {
    /// Human label (the field's `string`, falling back to its name).
    pub label: &'a str,
    /// Technical field name.
    pub field_name: &'a str,
    /// The value to render.
    pub value: &'a Value,
    /// This field's `fields_get` entry.
    pub field_info: &'a Value,
    /// The whole model's `fields_get` map (relation lookups).
    pub fields_info: &'a Value,
}

type FormatterFn = fn(&FieldContext<'_>) -> String;

/// Registry dispatching on the Odoo field type tag.
pub struct FormatterRegistry {
    formatters: HashMap<&'static str, FormatterFn>,
    default: FormatterFn,
}

impl FormatterRegistry {
    pub fn new() -> Self {
        let mut formatters: HashMap<&'static str, FormatterFn> = HashMap::new();
        formatters.insert("char", format_scalar);
        formatters.insert("text", format_scalar);
        formatters.insert("integer", format_scalar);
        formatters.insert("date", format_scalar);
        formatters.insert("datetime", format_scalar);
        formatters.insert("float", format_float);
        formatters.insert("monetary", format_monetary);
        formatters.insert("boolean", format_boolean);
        formatters.insert("selection", format_selection);
        formatters.insert("many2one", format_many2one);
        formatters.insert("one2many", format_x2many);
        formatters.insert("many2many", format_x2many);
        formatters.insert("binary", format_binary);

        Self {
            formatters,
            default: format_default,
        }
    }

    /// Render one field as a `label: value` line.
    pub fn format_field(&self, field_type: &str, ctx: &FieldContext<'_>) -> String {
        let formatter = self.formatters.get(field_type).unwrap_or(&self.default);
        formatter(ctx)
    }
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Unset values: `null` always, and `false` for anything non-boolean
/// (Odoo's XML-RPC layer sends `false` for empty fields).
fn is_unset(value: &Value) -> bool {
    value.is_null() || value == &Value::Bool(false)
}

fn not_set(label: &str) -> String {
    format!("{label}: Not set")
}

fn format_scalar(ctx: &FieldContext<'_>) -> String {
    if is_unset(ctx.value) {
        return not_set(ctx.label);
    }
    match ctx.value {
        Value::String(s) => format!("{}: {}", ctx.label, sanitize_str(s)),
        other => format!("{}: {other}", ctx.label),
    }
}

fn format_float(ctx: &FieldContext<'_>) -> String {
    format_decimal(ctx, 2)
}

fn format_monetary(ctx: &FieldContext<'_>) -> String {
    format_decimal(ctx, 1)
}

fn format_decimal(ctx: &FieldContext<'_>, default_decimals: usize) -> String {
    if is_unset(ctx.value) {
        return not_set(ctx.label);
    }
    let Some(number) = ctx.value.as_f64() else {
        return format!("{}: {}", ctx.label, ctx.value);
    };

    // fields_get reports precision as digits: [total, decimals].
    let decimals = ctx.field_info["digits"]
        .as_array()
        .filter(|digits| digits.len() == 2)
        .and_then(|digits| digits[1].as_u64())
        .map(|d| d as usize)
        .unwrap_or(default_decimals);

    format!("{}: {:.decimals$}", ctx.label, number)
}

fn format_boolean(ctx: &FieldContext<'_>) -> String {
    if ctx.value.is_null() {
        return not_set(ctx.label);
    }
    let yes = ctx.value.as_bool().unwrap_or(false);
    format!("{}: {}", ctx.label, if yes { "Yes" } else { "No" })
}

fn format_selection(ctx: &FieldContext<'_>) -> String {
    if is_unset(ctx.value) {
        return not_set(ctx.label);
    }
    let key = ctx.value.as_str().unwrap_or_default();

    // Resolve the human label from the (key, label) pairs when present.
    if let Some(options) = ctx.field_info["selection"].as_array() {
        for option in options {
            if option[0].as_str() == Some(key) {
                if let Some(label) = option[1].as_str() {
                    return format!("{}: {label}", ctx.label);
                }
            }
        }
    }
    format!("{}: {}", ctx.label, ctx.value.as_str().unwrap_or(""))
}

fn format_many2one(ctx: &FieldContext<'_>) -> String {
    if is_unset(ctx.value) {
        return not_set(ctx.label);
    }

    let relation = many2one_relation(ctx);
    match ctx.value {
        Value::Array(pair) if pair.len() == 2 => {
            let id = pair[0].as_i64().unwrap_or_default();
            let name = pair[1].as_str().unwrap_or("Unnamed");
            format!("{}: {name} [odoo://{relation}/record/{id}]", ctx.label)
        }
        Value::Number(n) => {
            let id = n.as_i64().unwrap_or_default();
            format!("{}: Record #{id} [odoo://{relation}/record/{id}]", ctx.label)
        }
        other => format!("{}: {other}", ctx.label),
    }
}

fn format_x2many(ctx: &FieldContext<'_>) -> String {
    if is_unset(ctx.value) {
        return not_set(ctx.label);
    }
    let Some(ids) = ctx.value.as_array() else {
        return format!("{}: {}", ctx.label, ctx.value);
    };

    let count = ids.len();
    if count == 0 {
        return format!("{}: 0 related records", ctx.label);
    }

    match x2many_relation(ctx) {
        Some(relation) => {
            let csv = ids
                .iter()
                .filter_map(Value::as_i64)
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "{}: {count} related records [odoo://{relation}/browse?ids={csv}]",
                ctx.label
            )
        }
        None => format!("{}: {count} related records", ctx.label),
    }
}

fn format_binary(ctx: &FieldContext<'_>) -> String {
    if is_unset(ctx.value) {
        return not_set(ctx.label);
    }
    match ctx.value.as_str() {
        Some(data) if !data.is_empty() => {
            // Base64 payload: 4 characters encode 3 bytes.
            let approx_bytes = data.len() * 3 / 4;
            format!("{}: [Binary data, {}]", ctx.label, human_size(approx_bytes))
        }
        _ => format!("{}: [Binary data]", ctx.label),
    }
}

fn format_default(ctx: &FieldContext<'_>) -> String {
    if is_unset(ctx.value) {
        return not_set(ctx.label);
    }
    match ctx.value {
        Value::String(s) => format!("{}: {}", ctx.label, sanitize_str(s)),
        other => format!("{}: {other}", ctx.label),
    }
}

/// Relation for a many2one field: direct lookup, `_id` suffix retry, then
/// the literal field name.
fn many2one_relation(ctx: &FieldContext<'_>) -> String {
    if let Some(relation) = ctx.field_info["relation"].as_str() {
        if !relation.is_empty() {
            return relation.to_string();
        }
    }

    let name = ctx.field_name.to_lowercase();
    if let Some(relation) = relation_of(ctx.fields_info, &name) {
        return relation;
    }
    if !name.ends_with("_id") {
        if let Some(relation) = relation_of(ctx.fields_info, &format!("{name}_id")) {
            return relation;
        }
    }
    ctx.field_name.to_string()
}

/// Relation for a *2many field: direct, `_ids` suffix, and the `tags` /
/// `lines` label aliases. `None` when nothing resolves; the caller then
/// omits the URI.
fn x2many_relation(ctx: &FieldContext<'_>) -> Option<String> {
    if let Some(relation) = ctx.field_info["relation"].as_str() {
        if !relation.is_empty() {
            return Some(relation.to_string());
        }
    }

    let name = ctx.field_name.to_lowercase();
    if let Some(relation) = relation_of(ctx.fields_info, &name) {
        return Some(relation);
    }
    if !name.ends_with("_ids") {
        if let Some(relation) = relation_of(ctx.fields_info, &format!("{name}_ids")) {
            return Some(relation);
        }
    }
    match name.as_str() {
        "tags" => relation_of(ctx.fields_info, "tag_ids"),
        "lines" => relation_of(ctx.fields_info, "line_ids"),
        _ => None,
    }
}

fn relation_of(fields_info: &Value, field_name: &str) -> Option<String> {
    fields_info[field_name]["relation"]
        .as_str()
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

fn human_size(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

// --- record / search rendering ------------------------------------------

/// Fields never shown in record output.
const EXCLUDED_FIELDS: [&str; 8] = [
    "id",
    "__last_update",
    "create_uid",
    "create_date",
    "write_uid",
    "write_date",
    "message_ids",
    "message_follower_ids",
];

/// Name-ish fields, in preference order.
pub const PRIORITY_FIELDS: [&str; 5] = ["name", "display_name", "code", "reference", "number"];

/// Render a whole record: header line plus one line per field.
pub fn format_record(
    registry: &FormatterRegistry,
    model: &str,
    record: &Value,
    fields_info: &Value,
) -> String {
    let record_id = record["id"].as_i64().unwrap_or_default();
    let mut lines = vec![format!("Resource: {model}/record/{record_id}")];

    let Some(map) = record.as_object() else {
        return lines.join("\n");
    };

    let mut field_names: Vec<&String> = map
        .keys()
        .filter(|name| !EXCLUDED_FIELDS.contains(&name.as_str()))
        .collect();
    field_names.sort_by_key(|name| {
        let priority = PRIORITY_FIELDS
            .iter()
            .position(|p| p == name)
            .unwrap_or(PRIORITY_FIELDS.len());
        (priority, name.as_str())
    });

    for name in field_names {
        let value = &map[name.as_str()];
        let field_info = &fields_info[name.as_str()];
        let field_type = field_info["type"].as_str().unwrap_or("char");
        let label = field_info["string"].as_str().unwrap_or(name);

        lines.push(registry.format_field(
            field_type,
            &FieldContext {
                label,
                field_name: name,
                value,
                field_info,
                fields_info,
            },
        ));
    }

    lines.join("\n")
}

/// Best display name for a record in a result list.
pub fn record_display_name(record: &Value) -> String {
    for field in PRIORITY_FIELDS {
        if let Some(name) = record[field].as_str() {
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    format!("Record #{}", record["id"].as_i64().unwrap_or_default())
}

/// Render a page of search results with pagination links.
pub fn format_search_results(
    model: &str,
    records: &[Value],
    total_count: i64,
    limit: u32,
    offset: u32,
    domain: &odoo_mcp_core::Domain,
) -> String {
    let mut lines = vec![format!(
        "Search Results: {model} ({total_count} total matches)"
    )];

    let from = i64::from(offset) + 1;
    let to = (i64::from(offset) + i64::from(limit)).min(total_count);
    if total_count > 0 {
        lines.push(format!("Showing: Records {from}-{to} of {total_count}"));
    }

    if records.is_empty() {
        lines.push("\nNo records found matching the criteria.".to_string());
    } else {
        lines.push("\nRecords:".to_string());
        for (index, record) in records.iter().enumerate() {
            let id = record["id"].as_i64().unwrap_or_default();
            lines.push(format!(
                "{}. {} [odoo://{model}/record/{id}]",
                index + 1,
                record_display_name(record)
            ));
        }
    }

    let page_uri = |page_offset: u32| {
        let params = std::collections::BTreeMap::from([
            ("domain".to_string(), domain.to_json()),
            ("offset".to_string(), Value::from(page_offset)),
            ("limit".to_string(), Value::from(limit)),
        ]);
        odoo_mcp_core::build_resource_uri(model, &odoo_mcp_core::ResourceOp::Search, &params)
    };

    if total_count > to {
        lines.push(format!("\nNext page: {}", page_uri(offset + limit)));
    }
    if offset > 0 {
        lines.push(format!(
            "Previous page: {}",
            page_uri(offset.saturating_sub(limit))
        ));
    }

    lines.join("\n")
}

/// Render a model's field catalogue, grouped by type.
pub fn format_field_list(model: &str, fields_info: &Value) -> String {
    let mut lines = vec![format!("Fields for {model}:")];

    let Some(map) = fields_info.as_object() else {
        return lines.join("\n");
    };

    // Group field names by type tag.
    let mut groups: std::collections::BTreeMap<&str, Vec<&String>> =
        std::collections::BTreeMap::new();
    for (name, info) in map {
        let field_type = info["type"].as_str().unwrap_or("unknown");
        groups.entry(field_type).or_default().push(name);
    }

    for (field_type, mut names) in groups {
        names.sort();
        lines.push(format!("\n{} fields:", field_type.to_uppercase()));

        for name in names {
            let info = &map[name.as_str()];
            let label = info["string"].as_str().unwrap_or(name);

            let mut flags = Vec::new();
            if info["required"].as_bool().unwrap_or(false) {
                flags.push("required");
            }
            if info["readonly"].as_bool().unwrap_or(false) {
                flags.push("readonly");
            }
            let flag_suffix = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };

            lines.push(format!("- {name}: {label}{flag_suffix}"));

            if let Some(relation) = info["relation"].as_str() {
                if !relation.is_empty() {
                    lines.push(format!("  Relation: {relation}"));
                }
            }
            if let Some(help) = info["help"].as_str() {
                if !help.is_empty() {
                    lines.push(format!("  Help: {}", sanitize_str(help)));
                }
            }
            if matches!(field_type, "float" | "monetary") {
                if let Some(digits) = info["digits"].as_array() {
                    if digits.len() == 2 {
                        lines.push(format!(
                            "  Precision: ({}, {})",
                            digits[0], digits[1]
                        ));
                    }
                }
            }
            if field_type == "selection" {
                if let Some(options) = info["selection"].as_array() {
                    if options.len() > 5 {
                        lines.push(format!("  {} choices available", options.len()));
                    } else if !options.is_empty() {
                        let rendered: Vec<String> = options
                            .iter()
                            .map(|option| {
                                format!(
                                    "{} ({})",
                                    option[0].as_str().unwrap_or("?"),
                                    option[1].as_str().unwrap_or("?")
                                )
                            })
                            .collect();
                        lines.push(format!("  Options: {}", rendered.join(", ")));
                    }
                }
            }
        }
    }

    lines.join("\n")
}
