//! Extraction of the JSON report from raw model text.
//!
//! Models wrap their JSON in code fences or prose often enough that a plain
//! parse is only the first of three strategies.

use serde_json::Value;

/// Parse the first JSON object found in `raw`.
///
/// Tries, in order: the whole text, the first fenced code block, and the first
/// balanced `{...}` span. Returns `None` if none yields a JSON object.
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    parse_object(trimmed)
        .or_else(|| fenced_block(trimmed).and_then(parse_object))
        .or_else(|| first_balanced_object(trimmed).and_then(parse_object))
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(Value::is_object)
}

/// Body of the first ``` fence, with an optional language tag stripped.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let after = &text[start..];
    let body_start = after.find('\n').map_or(0, |i| i + 1);
    let tag = after[..body_start].trim();
    // A non-word tag means the fence body started on the same line.
    let body = if tag.is_empty() || tag.chars().all(char::is_alphanumeric) {
        &after[body_start..]
    } else {
        after
    };
    let end = body.find("```")?;
    Some(&body[..end])
}

/// First `{...}` span whose braces balance, skipping braces inside strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
