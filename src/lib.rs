//! Tayrona Almacén POS - client core.
//!
//! Every non-visual piece of the point of sale lives here: money
//! formatting, the PHP API client, login and device approval, cash-drawer
//! reconciliation, inventory classification, sales reports, checkout,
//! tickets, CSV export and store settings. The `tayrona` binary is a thin
//! command-line shell over these modules (see [`commands`]).

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod analysis;
pub mod api;
pub mod auth;
pub mod checkout;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dashboard;
pub(crate) mod data_helpers;
pub mod db;
pub mod diagnostics;
pub mod export;
pub mod inventory;
pub mod money;
pub mod receipt_renderer;
pub mod sales;
pub mod settings;
pub mod shifts;
pub mod storage;

const DEFAULT_LOG_FILTER: &str = "info,tayrona_pos_lib=debug";

/// Initialize structured logging (console + daily rolling file).
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// until the process exits.
pub fn init_logging(log_dir: &Path) -> WorkerGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // Prune old log files before setting up the appender
    diagnostics::prune_old_logs(log_dir, diagnostics::MAX_LOG_FILES);
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("cannot create log dir {}: {e}", log_dir.display());
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    // Console output goes to stderr so command output on stdout stays clean.
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

/// Everything a command needs: configuration, local database, API client.
pub struct AppContext {
    pub config: config::AppConfig,
    pub db: Arc<db::DbState>,
    pub api: Arc<api::ApiClient>,
}

impl AppContext {
    /// Open the database, build the API client and resume any stored
    /// session and device fingerprint.
    pub fn init(config: config::AppConfig) -> Result<Self, String> {
        let db = Arc::new(db::init(&config.data_dir)?);
        let api = Arc::new(api::ApiClient::new(
            &config.api_base_url,
            config.request_timeout(),
        )?);

        match auth::device_fingerprint(&db) {
            Ok(fp) => api.set_device_fingerprint(Some(fp)),
            Err(e) => warn!(error = %e, "device fingerprint unavailable"),
        }
        match auth::restore_session(&db) {
            Ok(Some(session)) => {
                info!(user = %session.username, "session restored");
                api.set_token(Some(session.token));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not restore session"),
        }

        info!(
            version = env!("CARGO_PKG_VERSION"),
            api = api.base_url(),
            data_dir = %config.data_dir.display(),
            "Tayrona POS ready"
        );
        Ok(Self { config, db, api })
    }

    /// The stored session, or an error asking the cashier to log in.
    pub fn session(&self) -> Result<auth::Session, String> {
        auth::restore_session(&self.db)?
            .ok_or_else(|| "No hay sesión iniciada. Use `tayrona login`.".to_string())
    }

    /// Drop the local session when the backend says it is no longer valid.
    pub fn handle_api_error(&self, err: &api::ApiError) {
        if err.is_auth_failure() {
            warn!("backend rejected the session token, logging out locally");
            self.api.set_token(None);
            if let Err(e) = auth::clear_session(&self.db) {
                warn!(error = %e, "could not clear session");
            }
        }
    }
}

#[cfg(test)]
impl AppContext {
    /// In-memory database, mock keyring, API client bound to `api_base`.
    pub(crate) fn for_tests(api_base: &str) -> Self {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let config = config::AppConfig::default();
        let api = api::ApiClient::new(api_base, config.request_timeout()).expect("api client");
        Self {
            config,
            db: Arc::new(db::open_in_memory().expect("in-memory db")),
            api: Arc::new(api),
        }
    }

    pub(crate) fn login_for_tests(&self) {
        let now = chrono::Utc::now();
        let session = auth::Session {
            token: "token-de-prueba".into(),
            user_id: "7".into(),
            username: "caja1".into(),
            name: "Caja Uno".into(),
            role: auth::Role::Admin,
            logged_in_at: now,
            expires_at: now + chrono::Duration::hours(8),
        };
        auth::persist_session(&self.db, &session).expect("persist session");
        self.api.set_token(Some(session.token));
    }

    pub(crate) fn has_session_record(&self) -> bool {
        let conn = self.db.conn.lock().expect("db lock");
        db::get_setting(&conn, "session", "usuario").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::ApiError;

    #[test]
    fn rejected_token_clears_local_session() {
        let ctx = AppContext::for_tests("http://127.0.0.1:9");
        ctx.login_for_tests();
        assert!(ctx.has_session_record());
        assert!(ctx.api.has_token());

        ctx.handle_api_error(&ApiError::Unauthorized { status: 401 });
        assert!(!ctx.has_session_record());
        assert!(!ctx.api.has_token());
        assert!(ctx.session().is_err());
    }

    #[test]
    fn other_failures_keep_session() {
        let ctx = AppContext::for_tests("http://127.0.0.1:9");
        ctx.login_for_tests();
        ctx.handle_api_error(&ApiError::Timeout("http://127.0.0.1:9".into()));
        ctx.handle_api_error(&ApiError::Invalid("Monto inválido".into()));
        assert!(ctx.has_session_record());
        assert!(ctx.api.has_token());
    }
}
