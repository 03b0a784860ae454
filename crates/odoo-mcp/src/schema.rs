//! Tool input-schema sanitization.
//!
//! schemars renders `Option<T>` as nullable unions (`"type": ["string",
//! "null"]` or `anyOf` branches). Several MCP clients reject those
//! constructs, so every schema is collapsed to the non-null branch before
//! it is advertised.

use serde_json::{Map, Value};

/// Recursively collapse nullable unions in a JSON schema.
pub fn sanitize_schema(schema: &mut Value) {
    match schema {
        Value::Object(map) => sanitize_object(map),
        Value::Array(items) => {
            for item in items {
                sanitize_schema(item);
            }
        }
        _ => {}
    }
}

fn sanitize_object(map: &mut Map<String, Value>) {
    // "type": ["string", "null"] → "type": "string"
    if let Some(Value::Array(types)) = map.get("type") {
        let non_null: Vec<Value> = types
            .iter()
            .filter(|t| t.as_str() != Some("null"))
            .cloned()
            .collect();
        match non_null.len() {
            1 => {
                map.insert("type".into(), non_null.into_iter().next().unwrap());
            }
            0 => {
                map.remove("type");
            }
            _ => {
                map.insert("type".into(), Value::Array(non_null));
            }
        }
    }

    // anyOf/oneOf with a null branch → inline the non-null branch.
    for key in ["anyOf", "oneOf"] {
        let Some(Value::Array(branches)) = map.get(key) else {
            continue;
        };
        let non_null: Vec<Value> = branches
            .iter()
            .filter(|branch| branch.get("type").and_then(Value::as_str) != Some("null"))
            .cloned()
            .collect();
        if non_null.len() == 1 {
            let mut branch = non_null.into_iter().next().unwrap();
            sanitize_schema(&mut branch);
            map.remove(key);
            if let Value::Object(branch_map) = branch {
                for (k, v) in branch_map {
                    map.entry(k).or_insert(v);
                }
            }
        }
    }

    for value in map.values_mut() {
        sanitize_schema(value);
    }
}
