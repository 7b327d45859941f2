//! Field lookup over loosely-shaped provider payloads.
//!
//! Providers move fields around between API versions, so every field is read
//! through an ordered list of candidate locations and the first usable one wins.

use regex::Regex;
use serde_json::Value;

/// Follow a dotted key path (`data.balances.current`, `data.0.tvl`). `null` counts as missing.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// First non-null value among candidate key paths
pub fn first_present<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|path| lookup(value, path))
}

/// First candidate path whose value converts to a number
pub fn first_number(value: &Value, paths: &[&str]) -> Option<f64> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(to_number))
}

/// First candidate path whose value renders as non-empty text
pub fn first_text(value: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(to_text))
}

/// Numeric value of a JSON number or numeric string. Thousands separators are
/// stripped; anything that does not parse to a finite number is `None`.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

pub fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Seconds-or-milliseconds timestamp to milliseconds. Anything below 10^10 is taken as seconds.
pub fn to_ms(value: &Value) -> Option<i64> {
    let n = to_number(value)?;
    if n < 10_000_000_000.0 {
        Some((n * 1000.0).trunc() as i64)
    } else {
        Some(n.trunc() as i64)
    }
}

/// Comma separated query value into JSON strings, blanks dropped
pub fn split_list(raw: &str) -> Vec<Value> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| Value::from(s.to_string()))
        .collect()
}

/// First capture group of the first pattern that matches
pub fn first_capture(text: &str, patterns: &[Regex]) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}
