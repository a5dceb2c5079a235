//! Argument validation and normalization.
//!
//! Arguments are normalized before both the outbound call and the cache key
//! derivation, so `["Rust ", "rust"]` and `["rust"]` share one cache entry.

use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};

/// Validate and normalize call arguments for `operation`.
///
/// - `keywords`: non-empty array of non-empty strings; trimmed, lowercased,
///   deduplicated in first-seen order
/// - `keyword`: non-empty string; trimmed, lowercased
/// - `language_code`: `xx` or `xx-YY`
/// - `location_code`: positive integer
pub fn normalize_arguments(operation: &str, arguments: Value) -> Result<Value> {
    let invalid = |reason: String| GatewayError::InvalidArguments {
        operation: operation.to_string(),
        reason,
    };

    let Value::Object(map) = arguments else {
        return Err(invalid("arguments must be a JSON object".into()));
    };

    let mut normalized = Map::with_capacity(map.len());
    for (key, value) in map {
        let value = match key.as_str() {
            "keywords" => normalize_keywords(value).map_err(invalid)?,
            "keyword" => normalize_keyword(value).map_err(invalid)?,
            "language_code" => normalize_language(value).map_err(invalid)?,
            "location_code" => normalize_location(value).map_err(invalid)?,
            _ => value,
        };
        normalized.insert(key, value);
    }

    Ok(Value::Object(normalized))
}

fn normalize_keywords(value: Value) -> std::result::Result<Value, String> {
    let Value::Array(items) = value else {
        return Err("keywords must be an array".into());
    };

    let mut seen: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let keyword = item
            .as_str()
            .ok_or_else(|| "keywords must be strings".to_string())?
            .trim()
            .to_lowercase();
        if keyword.is_empty() {
            continue;
        }
        if !seen.contains(&keyword) {
            seen.push(keyword);
        }
    }

    if seen.is_empty() {
        return Err("keywords must not be empty".into());
    }
    Ok(Value::Array(seen.into_iter().map(Value::String).collect()))
}

fn normalize_keyword(value: Value) -> std::result::Result<Value, String> {
    let keyword = value
        .as_str()
        .ok_or_else(|| "keyword must be a string".to_string())?
        .trim()
        .to_lowercase();
    if keyword.is_empty() {
        return Err("keyword must not be empty".into());
    }
    Ok(Value::String(keyword))
}

fn normalize_language(value: Value) -> std::result::Result<Value, String> {
    let raw = value
        .as_str()
        .ok_or_else(|| "language_code must be a string".to_string())?
        .trim();

    let mut parts = raw.splitn(2, '-');
    let primary = parts.next().unwrap_or_default();
    let region = parts.next();

    let primary_ok = primary.len() == 2 && primary.chars().all(|c| c.is_ascii_alphabetic());
    let region_ok = region.map_or(true, |r| r.len() == 2 && r.chars().all(|c| c.is_ascii_alphabetic()));
    if !primary_ok || !region_ok {
        return Err(format!("invalid language_code {raw:?}"));
    }

    let code = match region {
        Some(region) => format!("{}-{}", primary.to_lowercase(), region.to_uppercase()),
        None => primary.to_lowercase(),
    };
    Ok(Value::String(code))
}

fn normalize_location(value: Value) -> std::result::Result<Value, String> {
    let code = match &value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match code {
        Some(code) if code > 0 => Ok(Value::from(code)),
        _ => Err(format!("invalid location_code {value}")),
    }
}
