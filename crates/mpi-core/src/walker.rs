//! Dotted-path access into nested JSON documents.
//!
//! `walk("name.given", doc)` descends one segment at a time. Whenever a
//! segment lands on an array, every element is visited and the results are
//! flattened, so multi-level arrays produce a single flat sequence of leaves.
//! Null values and missing segments yield nothing.

use serde_json::Value as JsonValue;

/// Collect every leaf value reachable through `path`.
pub fn walk<'a>(path: &str, value: &'a JsonValue) -> Vec<&'a JsonValue> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    descend(&segments, value, &mut out);
    out
}

/// Like [`walk`], but clones the leaves.
pub fn walk_owned(path: &str, value: &JsonValue) -> Vec<JsonValue> {
    walk(path, value).into_iter().cloned().collect()
}

/// String leaves only; other scalar types are skipped.
pub fn walk_strings(path: &str, value: &JsonValue) -> Vec<String> {
    walk(path, value)
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Split a dotted path, rejecting empty segments.
pub fn segments(path: &str) -> Option<Vec<&str>> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        None
    } else {
        Some(parts)
    }
}

fn descend<'a>(segments: &[&str], value: &'a JsonValue, out: &mut Vec<&'a JsonValue>) {
    match value {
        JsonValue::Array(items) => {
            for item in items {
                descend(segments, item, out);
            }
        }
        JsonValue::Null => {}
        _ => match segments.split_first() {
            None => out.push(value),
            Some((head, rest)) => {
                if let Some(child) = value.get(*head) {
                    descend(rest, child, out);
                }
            }
        },
    }
}
