//! Small text helpers shared by the formatters.

/// Longest string the formatters will emit for a single value.
const MAX_VALUE_LEN: usize = 1000;

/// Strip control characters and truncate very long values.
///
/// Keeps `\n`, `\r`, and `\t`; anything else below 0x20 is dropped. Values
/// longer than 1000 characters are cut with a `... (truncated)` marker.
pub fn sanitize_str(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| *c >= ' ' || matches!(c, '\n' | '\r' | '\t'))
        .collect();

    if cleaned.chars().count() > MAX_VALUE_LEN {
        let cut: String = cleaned.chars().take(MAX_VALUE_LEN).collect();
        format!("{cut}... (truncated)")
    } else {
        cleaned
    }
}

/// User-friendly display name for a technical model name.
///
/// `res.partner` becomes `Partner`, `stock.picking.type` becomes
/// `Picking Type`: the last dotted part, title-cased with underscores
/// turned into spaces.
pub fn model_display_name(model: &str) -> String {
    let last = model.rsplit('.').next().unwrap_or(model);
    last.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
