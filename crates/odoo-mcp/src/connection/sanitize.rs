//! Fault message sanitization.
//!
//! Odoo faults frequently embed the full server traceback and absolute
//! file paths. Neither belongs in a client-facing message.

/// Strip traceback blocks and absolute server paths from a fault message.
pub fn sanitize_fault(message: &str) -> String {
    let mut lines = Vec::new();
    let mut in_traceback = false;

    for line in message.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("Traceback (most recent") {
            in_traceback = true;
            continue;
        }
        if in_traceback {
            // Traceback bodies are indented; the first flush-left line ends
            // the block and is usually the exception itself.
            if line.starts_with(' ') || line.starts_with('\t') || trimmed.is_empty() {
                continue;
            }
            in_traceback = false;
        }
        lines.push(strip_paths(line));
    }

    let cleaned = lines.join("\n").trim().to_string();
    if cleaned.is_empty() {
        "Server error".to_string()
    } else {
        cleaned
    }
}

fn strip_paths(line: &str) -> String {
    line.split_whitespace()
        .filter(|token| {
            let bare = token.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | '(' | ')'));
            !(bare.starts_with("/opt/") || bare.starts_with("/usr/") || bare.starts_with("/home/"))
        })
        .collect::<Vec<_>>()
        .join(" ")
}
