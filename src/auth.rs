//! Backend login, local session, device approval and supervisor PIN.
//!
//! The cashier logs in against `auth.php`; the returned token goes to the
//! OS credential store and the user record to `local_settings` (category
//! "session"), so the CLI can resume a session across runs. Every terminal
//! identifies itself with a stable fingerprint that an administrator must
//! approve through `dispositivos_confiables.php`.
//!
//! Discounts above the configured limit need a supervisor PIN. The PIN is
//! local: a bcrypt hash in `local_settings` (category "supervisor") with a
//! persisted lockout after repeated failures.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::api::{endpoints, ApiClient, ApiError};
use crate::checkout::DiscountAuthorizer;
use crate::data_helpers::{
    de_id, de_opt_string, de_opt_timestamp, extract_array, json_to_bool, parse_rows,
};
use crate::{db, storage};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const DEFAULT_SESSION_HOURS: i64 = 12;
const MIN_PIN_LEN: usize = 4;

const SESSION_CATEGORY: &str = "session";
const SESSION_USER_KEY: &str = "usuario";
const DEVICE_CATEGORY: &str = "device";
const INSTALL_ID_KEY: &str = "install_id";
const SUPERVISOR_CATEGORY: &str = "supervisor";
const PIN_HASH_KEY: &str = "pin_hash";
const LOCKOUT_ATTEMPTS_KEY: &str = "lockout_attempts";
const LOCKOUT_LAST_ATTEMPT_KEY: &str = "lockout_last_attempt";

const ADMIN_PERMISSIONS: &[&str] = &[
    "vender",
    "abrir_caja",
    "cerrar_caja",
    "movimientos_caja",
    "ver_reportes",
    "ver_inventario",
    "exportar",
    "aplicar_descuento",
    "autorizar_descuento",
    "configurar",
    "gestionar_dispositivos",
];

const SUPERVISOR_PERMISSIONS: &[&str] = &[
    "vender",
    "abrir_caja",
    "cerrar_caja",
    "movimientos_caja",
    "ver_reportes",
    "ver_inventario",
    "exportar",
    "aplicar_descuento",
    "autorizar_descuento",
];

const CASHIER_PERMISSIONS: &[&str] = &[
    "vender",
    "abrir_caja",
    "cerrar_caja",
    "movimientos_caja",
    "aplicar_descuento",
];

// ---------------------------------------------------------------------------
// Roles and sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Supervisor,
    Cajero,
}

impl Role {
    /// Unknown roles get the most restricted permission set.
    pub fn from_value(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "admin" | "administrador" => Role::Admin,
            "supervisor" | "encargado" => Role::Supervisor,
            _ => Role::Cajero,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Supervisor => "supervisor",
            Role::Cajero => "cajero",
        }
    }

    pub fn permissions(self) -> &'static [&'static str] {
        match self {
            Role::Admin => ADMIN_PERMISSIONS,
            Role::Supervisor => SUPERVISOR_PERMISSIONS,
            Role::Cajero => CASHIER_PERMISSIONS,
        }
    }

    pub fn has_permission(self, permission: &str) -> bool {
        self.permissions().contains(&permission)
    }
}

/// A logged-in cashier. The token itself is never written to SQLite.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(skip)]
    pub token: String,
    pub user_id: String,
    pub username: String,
    pub name: String,
    pub role: Role,
    pub logged_in_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("role", &self.role)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require(&self, permission: &str) -> Result<(), String> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(format!(
                "El rol {} no tiene permiso para esta operación ({permission})",
                self.role.as_str()
            ))
        }
    }
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    LoggedIn(Session),
    /// The credentials were accepted but this terminal is not approved yet.
    PendingApproval { message: String },
    Rejected { message: String },
}

/// Read the `exp` claim of a JWT. Opaque tokens return `None`.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
    })?;
    DateTime::from_timestamp(exp, 0)
}

fn response_message(v: &Value, fallback: &str) -> String {
    ["message", "mensaje", "error"]
        .iter()
        .find_map(|k| v.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn is_pending(v: &Value) -> bool {
    let flagged = ["requiere_aprobacion", "pendiente_aprobacion"]
        .iter()
        .any(|k| v.get(*k).and_then(json_to_bool).unwrap_or(false));
    let status = ["estado_dispositivo", "estado"]
        .iter()
        .find_map(|k| v.get(*k).and_then(Value::as_str))
        .map(DeviceStatus::from_value);
    flagged || status == Some(DeviceStatus::Pendiente)
}

/// Turn the raw `auth.php` response into an outcome.
///
/// The session expiry is the JWT `exp` claim when present, else the
/// response's `expira`, else [`DEFAULT_SESSION_HOURS`] after `now`.
pub fn interpret_login_response(v: &Value, now: DateTime<Utc>) -> LoginOutcome {
    if is_pending(v) {
        return LoginOutcome::PendingApproval {
            message: response_message(v, "Dispositivo pendiente de aprobación"),
        };
    }
    let success = v.get("success").and_then(json_to_bool).unwrap_or(false);
    let data = v.get("data").filter(|d| d.is_object()).unwrap_or(v);
    let token = data
        .get("token")
        .or_else(|| v.get("token"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let token = match (success, token) {
        (true, Some(t)) => t.to_string(),
        _ => {
            return LoginOutcome::Rejected {
                message: response_message(v, "Usuario o contraseña incorrectos"),
            }
        }
    };

    let user = data
        .get("usuario")
        .or_else(|| data.get("user"))
        .cloned()
        .unwrap_or(Value::Null);
    let text = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|k| match user.get(*k) {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_default()
    };

    let expires_at = token_expiry(&token)
        .or_else(|| {
            data.get("expira")
                .and_then(Value::as_str)
                .and_then(crate::data_helpers::parse_timestamp)
                .map(|naive| naive.and_utc())
        })
        .unwrap_or_else(|| now + Duration::hours(DEFAULT_SESSION_HOURS));

    let username = text(&["usuario", "username"]);
    let name = text(&["nombre", "name"]);
    LoginOutcome::LoggedIn(Session {
        token,
        user_id: text(&["id", "id_usuario"]),
        name: if name.is_empty() { username.clone() } else { name },
        username,
        role: Role::from_value(&text(&["rol", "role"])),
        logged_in_at: now,
        expires_at,
    })
}

/// Log in against the backend and persist the session on success.
///
/// The password is wiped from memory once the request has been sent.
pub async fn login(
    api: &ApiClient,
    db: &db::DbState,
    username: &str,
    password: Zeroizing<String>,
    fingerprint: &str,
) -> Result<LoginOutcome, String> {
    if username.trim().is_empty() || password.is_empty() {
        return Err("Usuario y contraseña son obligatorios".into());
    }
    api.set_device_fingerprint(Some(fingerprint.to_string()));

    let mut body = json!({
        "usuario": username.trim(),
        "password": password.as_str(),
        "huella_dispositivo": fingerprint,
    });
    let result = api
        .request_raw(
            Method::POST,
            endpoints::AUTH,
            &[("accion", "login".to_string())],
            Some(&body),
        )
        .await;
    if let Some(Value::String(s)) = body.get_mut("password") {
        s.zeroize();
    }
    drop(password);

    let outcome = match result {
        Ok(v) => interpret_login_response(&v, Utc::now()),
        Err(ApiError::Unauthorized { .. }) => LoginOutcome::Rejected {
            message: "Usuario o contraseña incorrectos".into(),
        },
        Err(e) => return Err(e.into()),
    };

    match &outcome {
        LoginOutcome::LoggedIn(session) => {
            persist_session(db, session)?;
            api.set_token(Some(session.token.clone()));
            info!(user = %session.username, role = session.role.as_str(), "login successful");
        }
        LoginOutcome::PendingApproval { .. } => {
            info!(user = username.trim(), "login pending device approval");
        }
        LoginOutcome::Rejected { message } => {
            warn!(user = username.trim(), reason = %message, "login rejected");
        }
    }
    Ok(outcome)
}

/// Store the token in the keyring and the user record in SQLite.
pub fn persist_session(db: &db::DbState, session: &Session) -> Result<(), String> {
    if let Err(e) = storage::set_credential(storage::KEY_AUTH_TOKEN, &session.token) {
        warn!(error = %e, "could not store auth token in credential store");
    }
    let record = serde_json::to_string(session).map_err(|e| e.to_string())?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, SESSION_CATEGORY, SESSION_USER_KEY, &record)
}

fn load_session_record(db: &db::DbState) -> Result<Option<Session>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let Some(raw) = db::get_setting(&conn, SESSION_CATEGORY, SESSION_USER_KEY) else {
        return Ok(None);
    };
    match serde_json::from_str::<Session>(&raw) {
        Ok(s) => Ok(Some(s)),
        Err(e) => {
            warn!(error = %e, "discarding unreadable session record");
            db::delete_setting(&conn, SESSION_CATEGORY, SESSION_USER_KEY)?;
            Ok(None)
        }
    }
}

/// Resume the stored session, if any. Expired sessions are cleared.
pub fn restore_session(db: &db::DbState) -> Result<Option<Session>, String> {
    let Some(mut session) = load_session_record(db)? else {
        return Ok(None);
    };
    if session.is_expired(Utc::now()) {
        info!(user = %session.username, "stored session expired");
        clear_session(db)?;
        return Ok(None);
    }
    match storage::get_credential(storage::KEY_AUTH_TOKEN) {
        Some(token) => {
            session.token = token;
            Ok(Some(session))
        }
        None => {
            warn!("session record without token, clearing");
            clear_session(db)?;
            Ok(None)
        }
    }
}

/// Remove every trace of the session from this machine.
pub fn clear_session(db: &db::DbState) -> Result<(), String> {
    if let Err(e) = storage::delete_credential(storage::KEY_AUTH_TOKEN) {
        warn!(error = %e, "could not delete auth token");
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::delete_setting(&conn, SESSION_CATEGORY, SESSION_USER_KEY)
}

/// Tell the backend, then clear local state whatever it answered.
pub async fn logout(api: &ApiClient, db: &db::DbState) -> Result<(), String> {
    if api.has_token() {
        if let Err(e) = api
            .request_raw(
                Method::POST,
                endpoints::AUTH,
                &[("accion", "logout".to_string())],
                Some(&json!({})),
            )
            .await
        {
            warn!(error = %e, "remote logout failed, clearing local session anyway");
        }
    }
    api.set_token(None);
    clear_session(db)?;
    info!("logged out");
    Ok(())
}

// ---------------------------------------------------------------------------
// Device fingerprint and approval
// ---------------------------------------------------------------------------

fn host_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|k| std::env::var(k).ok())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "desconocido".to_string())
}

pub fn compute_fingerprint(os: &str, arch: &str, host: &str, install_id: &str) -> String {
    let digest = md5::compute(format!("{os}|{arch}|{host}|{install_id}"));
    format!("{digest:x}")
}

/// The per-install UUID, created on first use.
pub fn install_id(db: &db::DbState) -> Result<String, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    if let Some(id) = db::get_setting(&conn, DEVICE_CATEGORY, INSTALL_ID_KEY) {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    db::set_setting(&conn, DEVICE_CATEGORY, INSTALL_ID_KEY, &id)?;
    info!(install_id = %id, "generated install id");
    Ok(id)
}

/// Stable fingerprint of this terminal.
pub fn device_fingerprint(db: &db::DbState) -> Result<String, String> {
    let id = install_id(db)?;
    Ok(compute_fingerprint(
        std::env::consts::OS,
        std::env::consts::ARCH,
        &host_name(),
        &id,
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Aprobado,
    Pendiente,
    Rechazado,
    Desconocido,
}

impl DeviceStatus {
    pub fn from_value(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "aprobado" | "approved" | "confiable" => DeviceStatus::Aprobado,
            "pendiente" | "pending" => DeviceStatus::Pendiente,
            "rechazado" | "rejected" | "revocado" => DeviceStatus::Rechazado,
            _ => DeviceStatus::Desconocido,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Aprobado => "aprobado",
            DeviceStatus::Pendiente => "pendiente",
            DeviceStatus::Rechazado => "rechazado",
            DeviceStatus::Desconocido => "desconocido",
        }
    }
}

fn de_device_status<'de, D>(deserializer: D) -> Result<DeviceStatus, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(v.as_str()
        .map(DeviceStatus::from_value)
        .unwrap_or(DeviceStatus::Desconocido))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrustedDevice {
    #[serde(default, deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, alias = "huella", alias = "huella_dispositivo", deserialize_with = "de_opt_string")]
    pub fingerprint: Option<String>,
    #[serde(default, alias = "nombre", alias = "nombre_dispositivo", deserialize_with = "de_opt_string")]
    pub name: Option<String>,
    #[serde(default, alias = "usuario", deserialize_with = "de_opt_string")]
    pub user: Option<String>,
    #[serde(default = "unknown_status", alias = "estado", deserialize_with = "de_device_status")]
    pub status: DeviceStatus,
    #[serde(default, alias = "fecha_solicitud", deserialize_with = "de_opt_timestamp")]
    pub requested_at: Option<chrono::NaiveDateTime>,
}

fn unknown_status() -> DeviceStatus {
    DeviceStatus::Desconocido
}

pub fn parse_device_status(v: &Value) -> DeviceStatus {
    let data = v.get("data").unwrap_or(v);
    ["estado", "status"]
        .iter()
        .find_map(|k| data.get(*k).or_else(|| v.get(*k)).and_then(Value::as_str))
        .map(DeviceStatus::from_value)
        .unwrap_or(DeviceStatus::Desconocido)
}

pub fn parse_devices(v: &Value) -> Vec<TrustedDevice> {
    parse_rows(extract_array(v, &["dispositivos", "devices", "data"]), "device")
}

pub async fn check_device(api: &ApiClient, fingerprint: &str) -> Result<DeviceStatus, ApiError> {
    let v = api
        .request_raw(
            Method::GET,
            endpoints::TRUSTED_DEVICES,
            &[
                ("accion", "verificar".to_string()),
                ("huella", fingerprint.to_string()),
            ],
            None,
        )
        .await?;
    Ok(parse_device_status(&v))
}

pub async fn request_approval(
    api: &ApiClient,
    fingerprint: &str,
    device_name: &str,
) -> Result<DeviceStatus, ApiError> {
    let v = api
        .post(
            endpoints::TRUSTED_DEVICES,
            &json!({
                "accion": "solicitar",
                "huella": fingerprint,
                "nombre": device_name,
            }),
        )
        .await?;
    info!(device = device_name, "device approval requested");
    Ok(match parse_device_status(&v) {
        DeviceStatus::Desconocido => DeviceStatus::Pendiente,
        other => other,
    })
}

pub async fn list_devices(api: &ApiClient, session: &Session) -> Result<Vec<TrustedDevice>, ApiError> {
    session.require("gestionar_dispositivos").map_err(ApiError::Invalid)?;
    let v = api
        .get(endpoints::TRUSTED_DEVICES, &[("accion", "listar".to_string())])
        .await?;
    Ok(parse_devices(&v))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Aprobar,
    Rechazar,
    Revocar,
}

impl DeviceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceAction::Aprobar => "aprobar",
            DeviceAction::Rechazar => "rechazar",
            DeviceAction::Revocar => "revocar",
        }
    }
}

pub async fn update_device(
    api: &ApiClient,
    session: &Session,
    device_id: &str,
    action: DeviceAction,
) -> Result<(), ApiError> {
    session.require("gestionar_dispositivos").map_err(ApiError::Invalid)?;
    if device_id.trim().is_empty() {
        return Err(ApiError::Invalid("Falta el id del dispositivo".into()));
    }
    api.post(
        endpoints::TRUSTED_DEVICES,
        &json!({ "accion": action.as_str(), "id": device_id.trim() }),
    )
    .await?;
    info!(device_id, action = action.as_str(), "device updated");
    Ok(())
}

// ---------------------------------------------------------------------------
// Supervisor PIN
// ---------------------------------------------------------------------------

struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

fn check_lockout(lockout: &LockoutEntry, now: DateTime<Utc>) -> Result<(), String> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        let elapsed = now - lockout.last_attempt;
        if elapsed < Duration::minutes(LOCKOUT_MINUTES) {
            let remaining = (LOCKOUT_MINUTES - elapsed.num_minutes()).max(1);
            return Err(format!(
                "Demasiados intentos fallidos. Reintente en {remaining} minuto(s)."
            ));
        }
    }
    Ok(())
}

fn record_failure(lockout: &mut LockoutEntry, now: DateTime<Utc>) {
    // A fresh run of failures starts once the previous lockout has expired.
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        lockout.attempts = 0;
    }
    lockout.attempts += 1;
    lockout.last_attempt = now;
    warn!(attempts = lockout.attempts, "failed supervisor PIN attempt");
}

fn reset_lockout(lockout: &mut LockoutEntry, now: DateTime<Utc>) {
    lockout.attempts = 0;
    lockout.last_attempt = now;
}

fn load_lockout(conn: &rusqlite::Connection) -> LockoutEntry {
    let attempts = db::get_setting(conn, SUPERVISOR_CATEGORY, LOCKOUT_ATTEMPTS_KEY)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let last_attempt = db::get_setting(conn, SUPERVISOR_CATEGORY, LOCKOUT_LAST_ATTEMPT_KEY)
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    LockoutEntry {
        attempts,
        last_attempt,
    }
}

/// Store the lockout counter. Returns false, after logging, when a write
/// failed.
fn persist_lockout(conn: &rusqlite::Connection, lockout: &LockoutEntry) -> bool {
    let entries = [
        (LOCKOUT_ATTEMPTS_KEY, lockout.attempts.to_string()),
        (LOCKOUT_LAST_ATTEMPT_KEY, lockout.last_attempt.to_rfc3339()),
    ];
    let mut stored = true;
    for (key, value) in entries {
        if let Err(e) = db::set_setting(conn, SUPERVISOR_CATEGORY, key, &value) {
            warn!(key, error = %e, "could not persist supervisor PIN lockout");
            stored = false;
        }
    }
    stored
}

fn validate_pin(pin: &str) -> Result<(), String> {
    if pin.len() < MIN_PIN_LEN {
        return Err(format!("El PIN debe tener al menos {MIN_PIN_LEN} dígitos"));
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err("El PIN solo puede contener dígitos".into());
    }
    Ok(())
}

/// Supervisor PIN backed by the local database.
pub struct SupervisorPin<'a> {
    db: &'a db::DbState,
}

impl<'a> SupervisorPin<'a> {
    pub fn new(db: &'a db::DbState) -> Self {
        Self { db }
    }

    pub fn is_configured(&self) -> bool {
        self.db
            .conn
            .lock()
            .map(|conn| db::get_setting(&conn, SUPERVISOR_CATEGORY, PIN_HASH_KEY).is_some())
            .unwrap_or(false)
    }

    /// Hash and store a new PIN. Clears any pending lockout.
    pub fn set(&self, pin: &str) -> Result<(), String> {
        self.set_with_cost(pin, bcrypt::DEFAULT_COST)
    }

    fn set_with_cost(&self, pin: &str, cost: u32) -> Result<(), String> {
        validate_pin(pin)?;
        let hash = bcrypt::hash(pin, cost).map_err(|e| format!("No se pudo cifrar el PIN: {e}"))?;
        let conn = self.db.conn.lock().map_err(|e| e.to_string())?;
        db::set_setting(&conn, SUPERVISOR_CATEGORY, PIN_HASH_KEY, &hash)?;
        persist_lockout(
            &conn,
            &LockoutEntry {
                attempts: 0,
                last_attempt: Utc::now(),
            },
        );
        info!("supervisor PIN set");
        Ok(())
    }

    /// Check `pin`, enforcing and updating the persisted lockout.
    pub fn verify(&self, pin: &str) -> Result<(), String> {
        let now = Utc::now();
        let conn = self.db.conn.lock().map_err(|e| e.to_string())?;
        let mut lockout = load_lockout(&conn);
        check_lockout(&lockout, now)?;

        let hash = db::get_setting(&conn, SUPERVISOR_CATEGORY, PIN_HASH_KEY)
            .ok_or("No hay PIN de supervisor configurado")?;

        if bcrypt::verify(pin.trim(), &hash).unwrap_or(false) {
            reset_lockout(&mut lockout, now);
            persist_lockout(&conn, &lockout);
            info!("supervisor PIN accepted");
            Ok(())
        } else {
            record_failure(&mut lockout, now);
            persist_lockout(&conn, &lockout);
            Err("PIN de supervisor incorrecto".into())
        }
    }
}

impl DiscountAuthorizer for SupervisorPin<'_> {
    fn authorize(&self, pin: &str) -> Result<(), String> {
        self.verify(pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> db::DbState {
        db::open_in_memory().expect("in-memory db")
    }

    fn lockout_attempts(db_state: &db::DbState) -> u32 {
        let conn = db_state.conn.lock().expect("db lock");
        db::get_setting(&conn, SUPERVISOR_CATEGORY, LOCKOUT_ATTEMPTS_KEY)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
    }

    fn fake_jwt(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.firma")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).single().expect("valid date")
    }

    #[test]
    fn jwt_exp_claim_is_read() {
        let token = fake_jwt(&json!({ "sub": 7, "exp": 1_715_400_000 }));
        let exp = token_expiry(&token).expect("exp claim");
        assert_eq!(exp.timestamp(), 1_715_400_000);
        assert!(token_expiry("opaque-token").is_none());
        assert!(token_expiry("a.b.c").is_none());
    }

    #[test]
    fn login_response_prefers_jwt_then_expira_then_default() {
        let jwt = fake_jwt(&json!({ "exp": 1_715_400_000 }));
        let outcome = interpret_login_response(
            &json!({
                "success": true,
                "token": jwt,
                "expira": "2030-01-01 00:00:00",
                "usuario": { "id": 3, "usuario": "ana", "nombre": "Ana Díaz", "rol": "supervisor" }
            }),
            now(),
        );
        let LoginOutcome::LoggedIn(session) = outcome else {
            panic!("expected a session");
        };
        assert_eq!(session.expires_at.timestamp(), 1_715_400_000);
        assert_eq!(session.user_id, "3");
        assert_eq!(session.name, "Ana Díaz");
        assert_eq!(session.role, Role::Supervisor);

        let outcome = interpret_login_response(
            &json!({
                "success": true,
                "data": { "token": "abc123", "expira": "2024-05-10 21:00:00",
                          "usuario": { "id": "9", "usuario": "juan", "rol": "cajero" } }
            }),
            now(),
        );
        let LoginOutcome::LoggedIn(session) = outcome else {
            panic!("expected a session");
        };
        assert_eq!(session.expires_at.format("%H:%M").to_string(), "21:00");
        assert_eq!(session.name, "juan");

        let outcome = interpret_login_response(
            &json!({ "success": 1, "token": "xyz", "usuario": { "id": 1 } }),
            now(),
        );
        let LoginOutcome::LoggedIn(session) = outcome else {
            panic!("expected a session");
        };
        assert_eq!(session.expires_at, now() + Duration::hours(12));
        assert_eq!(session.role, Role::Cajero);
    }

    #[test]
    fn pending_and_rejected_logins() {
        let pending = interpret_login_response(
            &json!({ "success": false, "requiere_aprobacion": true,
                     "mensaje": "Dispositivo no autorizado" }),
            now(),
        );
        assert!(matches!(
            pending,
            LoginOutcome::PendingApproval { ref message } if message == "Dispositivo no autorizado"
        ));

        let rejected = interpret_login_response(
            &json!({ "success": false, "message": "Credenciales inválidas" }),
            now(),
        );
        assert!(matches!(
            rejected,
            LoginOutcome::Rejected { ref message } if message == "Credenciales inválidas"
        ));

        let no_token = interpret_login_response(&json!({ "success": true }), now());
        assert!(matches!(no_token, LoginOutcome::Rejected { .. }));
    }

    #[test]
    fn role_permissions() {
        assert!(Role::Admin.has_permission("gestionar_dispositivos"));
        assert!(Role::Supervisor.has_permission("autorizar_descuento"));
        assert!(!Role::Supervisor.has_permission("configurar"));
        assert!(!Role::Cajero.has_permission("autorizar_descuento"));
        assert_eq!(Role::from_value("Administrador"), Role::Admin);
        assert_eq!(Role::from_value("otro"), Role::Cajero);
    }

    #[test]
    fn fingerprint_is_stable_per_install() {
        let db_state = test_db();
        let first = device_fingerprint(&db_state).expect("fingerprint");
        let second = device_fingerprint(&db_state).expect("fingerprint");
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);

        let other = test_db();
        assert_ne!(first, device_fingerprint(&other).expect("fingerprint"));

        assert_eq!(
            compute_fingerprint("linux", "x86_64", "caja1", "id"),
            compute_fingerprint("linux", "x86_64", "caja1", "id")
        );
        assert_ne!(
            compute_fingerprint("linux", "x86_64", "caja1", "id"),
            compute_fingerprint("linux", "x86_64", "caja2", "id")
        );
    }

    #[test]
    fn device_rows_and_status() {
        assert_eq!(
            parse_device_status(&json!({ "success": true, "data": { "estado": "aprobado" } })),
            DeviceStatus::Aprobado
        );
        assert_eq!(
            parse_device_status(&json!({ "estado": "PENDIENTE" })),
            DeviceStatus::Pendiente
        );
        assert_eq!(parse_device_status(&json!({})), DeviceStatus::Desconocido);

        let devices = parse_devices(&json!({
            "dispositivos": [
                { "id": 4, "huella": "abc", "nombre": "Caja 1", "estado": "rechazado",
                  "fecha_solicitud": "2024-05-01 10:00:00" },
                { "id": "5", "estado": "raro" }
            ]
        }));
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "4");
        assert_eq!(devices[0].status, DeviceStatus::Rechazado);
        assert_eq!(devices[0].name.as_deref(), Some("Caja 1"));
        assert!(devices[0].requested_at.is_some());
        assert_eq!(devices[1].status, DeviceStatus::Desconocido);
    }

    #[test]
    fn session_roundtrips_through_settings_without_token() {
        let db_state = test_db();
        let session = Session {
            token: "secreto".into(),
            user_id: "1".into(),
            username: "ana".into(),
            name: "Ana".into(),
            role: Role::Admin,
            logged_in_at: now(),
            expires_at: now() + Duration::hours(1),
        };
        let record = serde_json::to_string(&session).expect("serialize");
        assert!(!record.contains("secreto"));
        {
            let conn = db_state.conn.lock().expect("db lock");
            db::set_setting(&conn, SESSION_CATEGORY, SESSION_USER_KEY, &record).expect("store");
        }
        let loaded = load_session_record(&db_state).expect("load").expect("record");
        assert_eq!(loaded.username, "ana");
        assert_eq!(loaded.role, Role::Admin);
        assert!(loaded.token.is_empty());
        assert!(format!("{loaded:?}").contains("ana"));
    }

    #[test]
    fn pin_validation() {
        let db_state = test_db();
        let pin = SupervisorPin::new(&db_state);
        assert!(pin.set_with_cost("12", 4).is_err());
        assert!(pin.set_with_cost("12a4", 4).is_err());
        assert!(!pin.is_configured());
        assert_eq!(
            pin.verify("1234").expect_err("no pin configured"),
            "No hay PIN de supervisor configurado"
        );
    }

    #[test]
    fn lockout_persists_across_instances() {
        let db_state = test_db();
        SupervisorPin::new(&db_state)
            .set_with_cost("4321", 4)
            .expect("set pin");

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let err = SupervisorPin::new(&db_state)
                .verify("0000")
                .expect_err("wrong pin");
            assert_eq!(err, "PIN de supervisor incorrecto");
        }
        assert_eq!(lockout_attempts(&db_state), MAX_FAILED_ATTEMPTS);

        let err = SupervisorPin::new(&db_state)
            .authorize("4321")
            .expect_err("locked even with the right pin");
        assert!(err.contains("Demasiados intentos"), "unexpected: {err}");
        assert_eq!(lockout_attempts(&db_state), MAX_FAILED_ATTEMPTS);
    }

    #[test]
    fn correct_pin_resets_failures() {
        let db_state = test_db();
        let pin = SupervisorPin::new(&db_state);
        pin.set_with_cost("4321", 4).expect("set pin");
        assert!(pin.is_configured());

        pin.verify("1111").expect_err("wrong pin");
        pin.verify("2222").expect_err("wrong pin");
        assert_eq!(lockout_attempts(&db_state), 2);

        pin.verify("4321").expect("right pin");
        assert_eq!(lockout_attempts(&db_state), 0);
    }

    #[test]
    fn expired_lockout_allows_new_attempts() {
        let start = now();
        let mut entry = LockoutEntry {
            attempts: MAX_FAILED_ATTEMPTS,
            last_attempt: start,
        };
        assert!(check_lockout(&entry, start + Duration::minutes(5)).is_err());
        let later = start + Duration::minutes(LOCKOUT_MINUTES + 1);
        assert!(check_lockout(&entry, later).is_ok());
        record_failure(&mut entry, later);
        assert_eq!(entry.attempts, 1);
    }

    #[test]
    fn lockout_write_failure_is_reported() {
        let db_state = test_db();
        let entry = LockoutEntry {
            attempts: 2,
            last_attempt: now(),
        };
        let conn = db_state.conn.lock().expect("lock");
        assert!(persist_lockout(&conn, &entry));
        conn.execute_batch("DROP TABLE local_settings").expect("drop");
        assert!(!persist_lockout(&conn, &entry));
    }
}
