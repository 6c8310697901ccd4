//! Application configuration.
//!
//! Resolution order: built-in defaults, then `<data_dir>/config.json`, then
//! `TAYRONA_*` environment variables. Values edited by the cashier at
//! runtime (daily goal, cached user) are not here; they live in the local
//! database's `local_settings` table.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_URL: &str = "http://localhost/tayrona/api";
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_DASHBOARD_POLL_SECS: u64 = 30;
const DEFAULT_STATUS_POLL_SECS: u64 = 60;
const MIN_POLL_SECS: u64 = 10;
const MAX_POLL_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the PHP API, e.g. `https://tayrona.com.ar/api`.
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub dashboard_poll_secs: u64,
    pub status_poll_secs: u64,
    pub currency_symbol: String,
    /// Where `pos.db` and `logs/` live.
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            dashboard_poll_secs: DEFAULT_DASHBOARD_POLL_SECS,
            status_poll_secs: DEFAULT_STATUS_POLL_SECS,
            currency_symbol: crate::money::DEFAULT_SYMBOL.to_string(),
            data_dir: default_data_dir(),
        }
    }
}

impl AppConfig {
    /// Load the configuration for `data_dir` (or the platform default).
    pub fn load(data_dir: Option<&Path>) -> Result<Self, String> {
        let env_dir = std::env::var("TAYRONA_DATA_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        let dir = data_dir
            .map(Path::to_path_buf)
            .or(env_dir)
            .unwrap_or_else(default_data_dir);

        let file = dir.join(CONFIG_FILE);
        let mut config = if file.exists() {
            let raw = std::fs::read_to_string(&file)
                .map_err(|e| format!("No se pudo leer {}: {e}", file.display()))?;
            serde_json::from_str::<AppConfig>(&raw)
                .map_err(|e| format!("Configuración inválida en {}: {e}", file.display()))?
        } else {
            AppConfig::default()
        };
        config.data_dir = dir;
        config.apply_env();
        config.normalize();
        info!(
            api = %config.api_base_url,
            data_dir = %config.data_dir.display(),
            poll_secs = config.dashboard_poll_secs,
            "configuration loaded"
        );
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("TAYRONA_API_URL") {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
        if let Ok(raw) = std::env::var("TAYRONA_POLL_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.dashboard_poll_secs = secs,
                Err(_) => warn!(value = %raw, "ignoring invalid TAYRONA_POLL_SECS"),
            }
        }
        if let Ok(raw) = std::env::var("TAYRONA_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "ignoring invalid TAYRONA_TIMEOUT_SECS"),
            }
        }
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_api_url(&self.api_base_url);
        self.dashboard_poll_secs = self.dashboard_poll_secs.clamp(MIN_POLL_SECS, MAX_POLL_SECS);
        self.status_poll_secs = self.status_poll_secs.clamp(MIN_POLL_SECS, MAX_POLL_SECS);
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_TIMEOUT_SECS;
        }
        if self.currency_symbol.trim().is_empty() {
            self.currency_symbol = crate::money::DEFAULT_SYMBOL.to_string();
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn dashboard_interval(&self) -> Duration {
        Duration::from_secs(self.dashboard_poll_secs)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Write the current configuration to `<data_dir>/config.json`.
    pub fn save(&self) -> Result<(), String> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| format!("No se pudo crear {}: {e}", self.data_dir.display()))?;
        let raw = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(self.data_dir.join(CONFIG_FILE), raw).map_err(|e| e.to_string())
    }
}

/// Normalise the API base URL:
/// - ensure a scheme is present (http for localhost, https otherwise)
/// - strip trailing slashes
pub fn normalize_api_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return DEFAULT_API_URL.to_string();
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// `$XDG_DATA_HOME/tayrona-pos` (or the platform equivalent).
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("tayrona-pos")
}
