//! Normalization helpers for remote payload values and file names.

use serde_json::Value;

use crate::constants::output::UNKNOWN_CODE_NAME;
use crate::types::AuthorId;

/// Produce a filesystem-safe filename fragment for a code.
///
/// Runs of characters outside `[A-Za-z0-9_.-]` collapse into one `_`,
/// surrounding `_` are trimmed, and an empty result maps to `unknown`.
pub fn normalize_code_name(code: &str) -> String {
    let mut cleaned = String::with_capacity(code.len());
    let mut in_run = false;
    for ch in code.trim().chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-') {
            cleaned.push(ch);
            in_run = false;
        } else if !in_run {
            cleaned.push('_');
            in_run = true;
        }
    }
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        UNKNOWN_CODE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Reduce a raw author value to a stable identifier.
///
/// Strings are trimmed; objects use `name`, then `email`, then their
/// canonical JSON. Anything else, or an empty result, yields `None`.
pub fn normalize_author(raw: &Value) -> Option<AuthorId> {
    match raw {
        Value::String(value) => non_empty(value),
        Value::Object(map) => ["name", "email"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .find_map(non_empty)
            .or_else(|| serde_json::to_string(raw).ok()),
        _ => None,
    }
}

/// Look up a dotted quantity path (`results.method.method_name`).
///
/// A flat key holding the whole path takes precedence over nested lookup,
/// since projections may come back either way.
pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(flat) = value.get(path) {
        return Some(flat);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
