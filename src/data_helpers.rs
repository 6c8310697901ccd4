//! Lenient readers for the PHP backend's JSON.
//!
//! The backend serializes MySQL columns as they come: numbers often arrive
//! as strings (`"12.50"`), booleans as `0`/`1`/`"1"`, and missing values as
//! `null` or `""`. These helpers are used both as serde `deserialize_with`
//! functions on the DTOs and for ad-hoc reads from `serde_json::Value`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{db, money};

/// Interpret a JSON value as a number.
pub(crate) fn json_to_f64(v: &Value) -> Option<f64> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().or_else(|| money::parse_ars(trimmed))
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

/// Interpret a JSON value as a boolean (`true`, `1`, `"1"`, `"si"`, ...).
pub(crate) fn json_to_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|x| x != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "si" | "sí" | "yes" => Some(true),
            "0" | "false" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Serde: number or numeric string, `null`/empty → 0.
pub(crate) fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(json_to_f64(&v).unwrap_or(0.0))
}

/// Serde: optional number or numeric string.
pub(crate) fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(json_to_f64(&v))
}

/// Serde: bool-ish value, unknown → false.
pub(crate) fn de_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(json_to_bool(&v).unwrap_or(false))
}

/// Serde: ids come as numbers or strings; keep them as strings.
pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Serde: optional string where `""` means absent.
pub(crate) fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Parse the timestamp formats the backend emits: MySQL `DATETIME`
/// (`2024-03-01 18:30:00`), ISO-8601 with or without offset, or a bare date.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%d/%m/%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Serde: optional backend timestamp.
pub(crate) fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(v.as_str().and_then(parse_timestamp))
}

/// Pull an array out of a backend response that may be a bare array or an
/// object wrapping it under one of `keys`.
pub(crate) fn extract_array(v: &Value, keys: &[&str]) -> Vec<Value> {
    if let Some(arr) = v.as_array() {
        return arr.clone();
    }
    for key in keys {
        if let Some(arr) = v.get(*key).and_then(Value::as_array) {
            return arr.clone();
        }
    }
    Vec::new()
}

/// Deserialize every element that parses, skipping (and logging) the rest.
pub(crate) fn parse_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>, what: &str) -> Vec<T> {
    let total = rows.len();
    let parsed: Vec<T> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(kind = what, error = %e, "skipping malformed row");
                None
            }
        })
        .collect();
    if parsed.len() != total {
        tracing::debug!(kind = what, total, kept = parsed.len(), "rows parsed");
    }
    parsed
}

pub(crate) fn read_local_json(db: &db::DbState, key: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let raw = db::get_setting(&conn, "local", key);
    if let Some(raw) = raw {
        if let Ok(parsed) = serde_json::from_str::<Value>(&raw) {
            return Ok(parsed);
        }
    }
    Ok(Value::Null)
}

pub(crate) fn write_local_json(db: &db::DbState, key: &str, value: &Value) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "local", key, &value.to_string())
}
