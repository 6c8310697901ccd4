//! Diagnostics for Tayrona POS.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Local health**: schema version, database size, cached endpoints and
//!   their age, whether a session and a supervisor PIN are present
//! - **Settings dump** with secrets redacted, for support requests
//! - **Log rotation helpers**: used by `lib.rs` to prune rolling log files

use crate::db::DbState;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of daily log files to retain.
pub const MAX_LOG_FILES: usize = 14;

/// Prefix of the rolling log files (`pos.2024-05-10`).
pub const LOG_FILE_PREFIX: &str = "pos";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Local health
// ---------------------------------------------------------------------------

/// Collects what this terminal knows about itself without touching the
/// network.
pub fn get_local_health(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let schema_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or_else(|e| {
            warn!(error = %e, "could not read schema version, reporting 0");
            0
        });

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    let has_session = crate::db::get_setting(&conn, "session", "usuario").is_some();
    let has_pin = crate::db::get_setting(&conn, "supervisor", "pin_hash").is_some();

    Ok(json!({
        "schemaVersion": schema_version,
        "dbPath": db.db_path.display().to_string(),
        "dbSizeBytes": db_size,
        "cache": get_cache_ages(&conn, Utc::now()),
        "sessionStored": has_session,
        "supervisorPinSet": has_pin,
    }))
}

/// Age in seconds of every cached endpoint payload.
fn get_cache_ages(conn: &rusqlite::Connection, now: DateTime<Utc>) -> Value {
    let mut out = Map::new();
    let mut stmt = match conn.prepare("SELECT cache_key, fetched_at FROM response_cache") {
        Ok(s) => s,
        Err(e) => {
            warn!("cache query failed: {e}");
            return Value::Object(out);
        }
    };
    if let Ok(rows) = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    }) {
        for (key, fetched_at) in rows.flatten() {
            let age = DateTime::parse_from_rfc3339(&fetched_at)
                .ok()
                .map(|t| (now - t.with_timezone(&Utc)).num_seconds().max(0));
            out.insert(
                key,
                json!({ "fetchedAt": fetched_at, "ageSecs": age }),
            );
        }
    }
    Value::Object(out)
}

// ---------------------------------------------------------------------------
// Settings dump
// ---------------------------------------------------------------------------

/// All `local_settings` rows grouped by category, secrets redacted.
pub fn dump_local_settings(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT setting_category, setting_key, setting_value
             FROM local_settings ORDER BY setting_category, setting_key",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(|e| e.to_string())?;

    let mut out = Map::new();
    for (category, key, value) in rows.flatten() {
        let parsed = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
        let entry = out
            .entry(category)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            map.insert(key, parsed);
        }
    }
    Ok(redact_sensitive_fields(Value::Object(out)))
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if should_redact_key(&k) {
                        (k, Value::String("[REDACTED]".into()))
                    } else {
                        (k, redact_sensitive_fields(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    ["token", "password", "pin", "secret", "authorization", "huella"]
        .iter()
        .any(|marker| lower.contains(marker))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Prune old log files in `log_dir`, keeping only the most recent `keep`.
pub fn prune_old_logs(log_dir: &Path, keep: usize) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&format!("{LOG_FILE_PREFIX}.")))
                .unwrap_or(false);
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first; ties broken by name so dated files sort sensibly.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        assert!(info.get("version").is_some());
        assert!(info.get("buildTimestamp").is_some());
        assert!(info.get("gitSha").is_some());
        assert!(info.get("platform").is_some());
        assert!(info.get("arch").is_some());
    }

    #[test]
    fn test_local_health_with_fresh_db() {
        let db_state = crate::db::open_in_memory().unwrap();
        {
            let conn = db_state.conn.lock().unwrap();
            crate::db::cache_put(&conn, "pos_status", &json!({}), &Utc::now().to_rfc3339())
                .unwrap();
        }
        let health = get_local_health(&db_state).unwrap();
        assert_eq!(health["schemaVersion"], json!(2));
        assert_eq!(health["sessionStored"], json!(false));
        assert!(health["cache"]["pos_status"]["ageSecs"].is_i64());
    }

    #[test]
    fn test_local_health_without_schema_table() {
        let db_state = crate::db::open_in_memory().unwrap();
        db_state
            .conn
            .lock()
            .unwrap()
            .execute_batch("DROP TABLE schema_version")
            .unwrap();
        let health = get_local_health(&db_state).unwrap();
        assert_eq!(health["schemaVersion"], json!(0));
        assert!(health["cache"].is_object());
    }

    #[test]
    fn test_settings_dump_redacts_secrets() {
        let db_state = crate::db::open_in_memory().unwrap();
        {
            let conn = db_state.conn.lock().unwrap();
            crate::db::set_setting(&conn, "supervisor", "pin_hash", "$2b$04$abc").unwrap();
            crate::db::set_setting(&conn, "local", "meta_diaria", "150000.00").unwrap();
        }
        let dump = dump_local_settings(&db_state).unwrap();
        assert_eq!(dump["supervisor"]["pin_hash"], json!("[REDACTED]"));
        assert_eq!(dump["local"]["meta_diaria"], json!(150000.0));
    }

    #[test]
    fn test_redact_sensitive_fields_recurses_through_objects() {
        let value = json!({
            "token": "tk-val",
            "nested": { "password": "x", "status": "ok" },
            "items": [{ "huella_dispositivo": "abc" }, { "name": "safe" }]
        });
        let redacted = redact_sensitive_fields(value);
        assert_eq!(redacted["token"], json!("[REDACTED]"));
        assert_eq!(redacted["nested"]["password"], json!("[REDACTED]"));
        assert_eq!(redacted["nested"]["status"], json!("ok"));
        assert_eq!(redacted["items"][0]["huella_dispositivo"], json!("[REDACTED]"));
        assert_eq!(redacted["items"][1]["name"], json!("safe"));
    }

    #[test]
    fn test_prune_keeps_newest_logs_only() {
        let dir = std::env::temp_dir().join(format!("tayrona_logs_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for day in 1..=5 {
            fs::write(dir.join(format!("pos.2024-05-0{day}")), "x").unwrap();
        }
        fs::write(dir.join("otro.txt"), "x").unwrap();

        prune_old_logs(&dir, 3);

        let mut left: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left.len(), 4);
        assert!(left.contains(&"otro.txt".to_string()));
        let _ = fs::remove_dir_all(&dir);
    }
}
