use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Export ids arrive as strings or bare numbers; both normalise to a string.
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pulls text out of a string, an array of segments, or an object with a
/// text-like key. Array parts are joined with a single space.
pub fn extract_text(value: &Value) -> Option<String> {
    extract_text_depth(value, 0)
}

fn extract_text_depth(value: &Value, depth: usize) -> Option<String> {
    if depth > 6 {
        return None;
    }
    match value {
        Value::String(s) => Some(s.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| extract_text_depth(item, depth + 1))
                .filter(|text| !text.trim().is_empty())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        Value::Object(map) => {
            for key in ["text", "content", "transcript", "body"] {
                if let Some(text) = map.get(key).and_then(|v| extract_text_depth(v, depth + 1)) {
                    if !text.trim().is_empty() {
                        return Some(text);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n.as_i64().and_then(parse_timestamp_i64),
        _ => None,
    }
}

pub fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(num) = raw.parse::<i64>() {
        return parse_timestamp_i64(num);
    }
    None
}

pub fn parse_timestamp_i64(num: i64) -> Option<DateTime<Utc>> {
    if num <= 0 {
        return None;
    }
    // Values past ~year 2286 in seconds are taken to be milliseconds.
    if num > 10_000_000_000 {
        let secs = num / 1000;
        let nsec = ((num % 1000) * 1_000_000) as u32;
        return Utc.timestamp_opt(secs, nsec).single();
    }
    Utc.timestamp_opt(num, 0).single()
}

/// First `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
