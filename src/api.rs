//! PHP backend API client.
//!
//! Every screen of the POS reads and writes through a handful of PHP
//! endpoints that answer JSON. This client owns URL construction, the
//! bearer token and device headers, status-code mapping, and the backend's
//! `{ "success": ..., "data": ... }` envelope.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data_helpers::json_to_bool;

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(8);

/// Backend endpoint file names, relative to the API base URL.
pub mod endpoints {
    pub const POS_STATUS: &str = "pos_status.php";
    pub const CASH_MANAGEMENT: &str = "gestion_caja_completa.php";
    pub const FINANCIAL_REPORTS: &str = "reportes_financieros_precisos.php";
    pub const SMART_INVENTORY: &str = "inventario-inteligente.php";
    pub const PRODUCTS: &str = "productos.php";
    pub const SALES: &str = "ventas.php";
    pub const PROCESS_SALE: &str = "procesar_venta.php";
    pub const AUTH: &str = "auth.php";
    pub const TRUSTED_DEVICES: &str = "dispositivos_confiables.php";
    pub const SETTINGS: &str = "configuracion.php";
    pub const SMART_ANALYSIS: &str = "analisis_inteligente.php";
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No se puede conectar con el servidor {0}")]
    Connect(String),
    #[error("El servidor {0} no respondió a tiempo")]
    Timeout(String),
    #[error("Sesión vencida o sin permisos (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Rejected(String),
    #[error("Respuesta inválida del servidor: {0}")]
    InvalidJson(String),
    #[error("Error de cliente HTTP: {0}")]
    Client(String),
    /// Rejected locally before or after the request: bad input or an
    /// unusable payload.
    #[error("{0}")]
    Invalid(String),
}

impl ApiError {
    /// True when the session token should be discarded.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// True for failures where a cached value is a reasonable stand-in.
    pub fn is_unreachable(&self) -> bool {
        match self {
            ApiError::Connect(_) | ApiError::Timeout(_) => true,
            ApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ApiError> for String {
    fn from(e: ApiError) -> Self {
        e.to_string()
    }
}

/// Convert a `reqwest::Error` into an [`ApiError`].
fn transport_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::Timeout(url.to_string());
    }
    if err.is_connect() {
        return ApiError::Connect(url.to_string());
    }
    if err.is_builder() {
        return ApiError::Client(format!("URL inválida: {url}"));
    }
    ApiError::Connect(format!("{url}: {err}"))
}

/// Default message for an HTTP status without a usable body.
fn status_message(status: u16) -> String {
    match status {
        404 => "Servicio no encontrado en el servidor".to_string(),
        s if s >= 500 => "Error interno del servidor".to_string(),
        _ => "Respuesta inesperada del servidor".to_string(),
    }
}

/// The backend's own error message, when it sent one.
fn backend_message(v: &Value) -> Option<String> {
    ["message", "mensaje", "error", "msg"]
        .iter()
        .find_map(|k| v.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a response body as JSON.
///
/// PHP notices printed before the payload (`<br /><b>Warning</b>: ...`) are
/// skipped by retrying from the first `{` or `[`.
pub fn parse_body(body: &str) -> Result<Value, ApiError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => Ok(v),
        Err(first) => {
            let start = trimmed.find(|c: char| c == '{' || c == '[');
            if let Some(idx) = start.filter(|i| *i > 0) {
                if let Ok(v) = serde_json::from_str::<Value>(&trimmed[idx..]) {
                    warn!(skipped_bytes = idx, "backend emitted text before JSON payload");
                    return Ok(v);
                }
            }
            let snippet: String = trimmed.chars().take(120).collect();
            Err(ApiError::InvalidJson(format!("{first} ({snippet})")))
        }
    }
}

/// Map status code + body to the parsed JSON or an error. Does not look at
/// the `success` envelope; see [`unwrap_envelope`].
pub fn interpret_response(status: u16, body: &str) -> Result<Value, ApiError> {
    if status == 401 || status == 403 {
        return Err(ApiError::Unauthorized { status });
    }
    if !(200..300).contains(&status) {
        let message = parse_body(body)
            .ok()
            .as_ref()
            .and_then(backend_message)
            .unwrap_or_else(|| status_message(status));
        return Err(ApiError::Status { status, message });
    }
    parse_body(body)
}

/// Apply the `{ success, data, message }` convention.
///
/// `success: false` becomes [`ApiError::Rejected`]; a `data` member is
/// returned on its own; anything else is returned unchanged.
pub fn unwrap_envelope(v: Value) -> Result<Value, ApiError> {
    if let Some(flag) = v.get("success").and_then(json_to_bool) {
        if !flag {
            let message =
                backend_message(&v).unwrap_or_else(|| "El servidor rechazó la operación".into());
            return Err(ApiError::Rejected(message));
        }
    }
    match v {
        Value::Object(mut map) if map.contains_key("data") => {
            Ok(map.remove("data").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

/// Result of a connectivity test.
#[derive(Debug, serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// HTTP client bound to one backend base URL.
pub struct ApiClient {
    base_url: String,
    http: Client,
    token: RwLock<Option<String>>,
    device_fingerprint: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tayrona-pos/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;
        Ok(Self {
            base_url: crate::config::normalize_api_url(base_url),
            http,
            token: RwLock::new(None),
            device_fingerprint: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of an endpoint file.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token.filter(|t| !t.trim().is_empty());
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.read().map(|t| t.is_some()).unwrap_or(false)
    }

    pub fn set_device_fingerprint(&self, fingerprint: Option<String>) {
        if let Ok(mut guard) = self.device_fingerprint.write() {
            *guard = fingerprint;
        }
    }

    /// Send a request and return the parsed JSON without applying the
    /// `success` envelope.
    pub async fn request_raw(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = self.endpoint_url(endpoint);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("Accept", "application/json");

        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = self.token.read().ok().and_then(|t| t.clone()) {
            req = req.bearer_auth(token);
        }
        if let Some(fp) = self.device_fingerprint.read().ok().and_then(|f| f.clone()) {
            req = req.header("X-Device-Fingerprint", fp);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let started = Instant::now();
        let resp = req.send().await.map_err(|e| transport_error(&url, &e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| transport_error(&url, &e))?;
        debug!(
            method = %method,
            endpoint,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "api request"
        );
        interpret_response(status.as_u16(), &text)
    }

    /// Send a request and unwrap the backend envelope.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let raw = self.request_raw(method, endpoint, query, body).await?;
        unwrap_envelope(raw)
    }

    pub async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        self.request(Method::GET, endpoint, query, None).await
    }

    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, ApiError> {
        self.request(Method::POST, endpoint, &[], Some(body)).await
    }

    /// GET `primary`; on any error other than an auth failure, log and try
    /// `secondary` with the same query.
    pub async fn get_with_fallback(
        &self,
        primary: &str,
        secondary: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        match self.get(primary, query).await {
            Ok(v) => Ok(v),
            Err(e) if e.is_auth_failure() => Err(e),
            Err(e) => {
                warn!(primary, secondary, error = %e, "primary endpoint failed, using fallback");
                self.get(secondary, query).await
            }
        }
    }

    /// Lightweight health check against `pos_status.php`.
    pub async fn test_connectivity(&self) -> ConnectivityResult {
        let url = self.endpoint_url(endpoints::POS_STATUS);
        let start = Instant::now();
        let resp = match self
            .http
            .get(&url)
            .query(&[("ping", "1")])
            .timeout(CONNECTIVITY_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(transport_error(&url, &e).to_string()),
                };
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();
        if status.is_success() || status == StatusCode::UNAUTHORIZED {
            info!(latency_ms = latency, "connectivity test passed");
            ConnectivityResult {
                success: true,
                latency_ms: Some(latency),
                error: None,
            }
        } else {
            ConnectivityResult {
                success: false,
                latency_ms: Some(latency),
                error: Some(status_message(status.as_u16())),
            }
        }
    }
}
