//! Store configuration edited from the settings screen.
//!
//! `configuracion.php` stores settings as key/value rows; depending on the
//! backend version it answers with a list of `{clave, valor}` rows or with
//! a flat object. Both are accepted. A copy is kept locally so tickets can
//! still be printed with the right header while offline.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::api::{endpoints, ApiClient, ApiError};
use crate::data_helpers::{json_to_f64, read_local_json, write_local_json};
use crate::db::DbState;
use crate::sales;
use crate::shifts;

const LOCAL_KEY: &str = "store_settings";

pub mod keys {
    pub const BUSINESS_NAME: &str = "nombre_negocio";
    pub const ADDRESS: &str = "direccion";
    pub const PHONE: &str = "telefono";
    pub const CUIT: &str = "cuit";
    pub const TICKET_FOOTER: &str = "pie_ticket";
    pub const DAILY_GOAL: &str = "meta_diaria";
    pub const DEFAULT_MIN_STOCK: &str = "stock_minimo_default";
    pub const ARQUEO_TOLERANCE: &str = "tolerancia_arqueo";
    pub const MAX_DISCOUNT: &str = "descuento_maximo";
    pub const TICKET_WIDTH: &str = "ancho_ticket";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub business_name: String,
    pub address: String,
    pub phone: String,
    pub cuit: String,
    pub ticket_footer: String,
    pub daily_goal: f64,
    pub default_min_stock: f64,
    pub arqueo_tolerance: f64,
    /// Largest discount (percent) a cashier may apply without a supervisor.
    pub max_discount_pct: f64,
    pub ticket_width_mm: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            business_name: "Tayrona Almacén".to_string(),
            address: String::new(),
            phone: String::new(),
            cuit: String::new(),
            ticket_footer: "¡Gracias por su compra!".to_string(),
            daily_goal: 0.0,
            default_min_stock: 5.0,
            arqueo_tolerance: shifts::DEFAULT_TOLERANCE,
            max_discount_pct: 15.0,
            ticket_width_mm: 80,
        }
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl StoreSettings {
    /// Apply one backend key. Unknown keys are ignored.
    pub fn apply(&mut self, key: &str, value: &Value) {
        let number = || json_to_f64(value);
        match key.trim() {
            keys::BUSINESS_NAME | "nombre_tienda" => self.business_name = value_text(value),
            keys::ADDRESS => self.address = value_text(value),
            keys::PHONE => self.phone = value_text(value),
            keys::CUIT => self.cuit = value_text(value),
            keys::TICKET_FOOTER | "mensaje_ticket" => self.ticket_footer = value_text(value),
            keys::DAILY_GOAL => self.daily_goal = number().unwrap_or(0.0),
            keys::DEFAULT_MIN_STOCK => {
                if let Some(n) = number() {
                    self.default_min_stock = n;
                }
            }
            keys::ARQUEO_TOLERANCE => {
                if let Some(n) = number() {
                    self.arqueo_tolerance = n;
                }
            }
            keys::MAX_DISCOUNT => {
                if let Some(n) = number() {
                    self.max_discount_pct = n;
                }
            }
            keys::TICKET_WIDTH => {
                if let Some(n) = number() {
                    self.ticket_width_mm = n.round().max(0.0) as u32;
                }
            }
            other => debug!(key = other, "ignoring unknown setting"),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.business_name.trim().is_empty() {
            return Err("El nombre del negocio es obligatorio".into());
        }
        if !self.cuit.trim().is_empty() {
            validate_cuit(&self.cuit)?;
        }
        for (label, value) in [
            ("La meta diaria", self.daily_goal),
            ("El stock mínimo por defecto", self.default_min_stock),
            ("La tolerancia de arqueo", self.arqueo_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{label} debe ser mayor o igual a cero"));
            }
        }
        if !(0.0..=100.0).contains(&self.max_discount_pct) {
            return Err("El descuento máximo debe estar entre 0 y 100%".into());
        }
        if !matches!(self.ticket_width_mm, 58 | 80) {
            return Err("El ancho de ticket debe ser 58 u 80 mm".into());
        }
        Ok(())
    }

    /// Key/value rows in the backend's format.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (keys::BUSINESS_NAME, self.business_name.trim().to_string()),
            (keys::ADDRESS, self.address.trim().to_string()),
            (keys::PHONE, self.phone.trim().to_string()),
            (keys::CUIT, self.cuit.trim().to_string()),
            (keys::TICKET_FOOTER, self.ticket_footer.trim().to_string()),
            (keys::DAILY_GOAL, format!("{:.2}", self.daily_goal)),
            (keys::DEFAULT_MIN_STOCK, format!("{}", self.default_min_stock)),
            (keys::ARQUEO_TOLERANCE, format!("{:.2}", self.arqueo_tolerance)),
            (keys::MAX_DISCOUNT, format!("{}", self.max_discount_pct)),
            (keys::TICKET_WIDTH, self.ticket_width_mm.to_string()),
        ]
    }
}

/// Validate an Argentine CUIT/CUIL: 11 digits, dashes optional, valid
/// check digit.
pub fn validate_cuit(raw: &str) -> Result<(), String> {
    const WEIGHTS: [u32; 10] = [5, 4, 3, 2, 7, 6, 5, 4, 3, 2];
    let digits: Vec<u32> = raw
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<u32>>>()
        .ok_or_else(|| format!("CUIT inválido: {raw}"))?;
    if digits.len() != 11 {
        return Err(format!("El CUIT debe tener 11 dígitos: {raw}"));
    }
    let sum: u32 = digits.iter().zip(WEIGHTS.iter()).map(|(d, w)| d * w).sum();
    let expected = match 11 - sum % 11 {
        11 => 0,
        10 => 9,
        d => d,
    };
    if digits[10] != expected {
        return Err(format!("CUIT inválido (dígito verificador): {raw}"));
    }
    Ok(())
}

/// Parse either `[{clave, valor}, ...]` or `{clave: valor, ...}`.
pub fn parse_settings(payload: &Value) -> StoreSettings {
    let mut settings = StoreSettings::default();
    let source = payload.get("configuracion").unwrap_or(payload);
    match source {
        Value::Array(rows) => {
            for row in rows {
                let key = row
                    .get("clave")
                    .or_else(|| row.get("key"))
                    .or_else(|| row.get("nombre"))
                    .and_then(Value::as_str);
                let value = row.get("valor").or_else(|| row.get("value"));
                match (key, value) {
                    (Some(k), Some(v)) => settings.apply(k, v),
                    _ => warn!(?row, "setting row without clave/valor"),
                }
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                settings.apply(k, v);
            }
        }
        _ => warn!("unexpected settings payload, using defaults"),
    }
    settings
}

pub fn save_payload(settings: &StoreSettings) -> Value {
    let rows: Vec<Value> = settings
        .to_pairs()
        .into_iter()
        .map(|(clave, valor)| json!({ "clave": clave, "valor": valor }))
        .collect();
    json!({ "accion": "guardar", "configuracion": rows })
}

/// Last settings seen, or defaults.
pub fn load_local(db: &DbState) -> StoreSettings {
    match read_local_json(db, LOCAL_KEY) {
        Ok(Value::Null) => StoreSettings::default(),
        Ok(v) => serde_json::from_value(v).unwrap_or_else(|e| {
            warn!(error = %e, "discarding unreadable local settings");
            StoreSettings::default()
        }),
        Err(e) => {
            warn!(error = %e, "could not read local settings");
            StoreSettings::default()
        }
    }
}

/// Keep a local copy and mirror the daily goal where the dashboard reads it.
pub fn store_local(db: &DbState, settings: &StoreSettings) -> Result<(), String> {
    let value = serde_json::to_value(settings).map_err(|e| e.to_string())?;
    write_local_json(db, LOCAL_KEY, &value)?;
    sales::save_daily_goal(db, settings.daily_goal.max(0.0))
}

pub async fn fetch(api: &ApiClient, db: &DbState) -> Result<StoreSettings, ApiError> {
    let payload = api
        .get(endpoints::SETTINGS, &[("accion", "obtener".to_string())])
        .await?;
    let settings = parse_settings(&payload);
    if let Err(e) = store_local(db, &settings) {
        warn!(error = %e, "could not cache settings locally");
    }
    Ok(settings)
}

pub async fn save(api: &ApiClient, db: &DbState, settings: &StoreSettings) -> Result<(), ApiError> {
    settings.validate().map_err(ApiError::Invalid)?;
    api.post(endpoints::SETTINGS, &save_payload(settings)).await?;
    store_local(db, settings).map_err(ApiError::Invalid)?;
    info!("store settings saved");
    Ok(())
}

/// Flat object view, for display.
pub fn to_object(settings: &StoreSettings) -> Value {
    let map: Map<String, Value> = settings
        .to_pairs()
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v)))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn parses_key_value_rows() {
        let payload = json!({
            "configuracion": [
                { "clave": "nombre_negocio", "valor": "Almacén Tayrona" },
                { "clave": "meta_diaria", "valor": "250000" },
                { "clave": "descuento_maximo", "valor": 20 },
                { "clave": "ancho_ticket", "valor": "58" },
                { "clave": "tema", "valor": "oscuro" },
                { "valor": "sin clave" }
            ]
        });
        let s = parse_settings(&payload);
        assert_eq!(s.business_name, "Almacén Tayrona");
        assert_eq!(s.daily_goal, 250_000.0);
        assert_eq!(s.max_discount_pct, 20.0);
        assert_eq!(s.ticket_width_mm, 58);
        assert_eq!(s.arqueo_tolerance, shifts::DEFAULT_TOLERANCE);
    }

    #[test]
    fn parses_flat_object() {
        let s = parse_settings(&json!({
            "nombre_negocio": "Kiosco Sol",
            "cuit": "20-12345678-6",
            "tolerancia_arqueo": "50,00",
            "stock_minimo_default": null
        }));
        assert_eq!(s.business_name, "Kiosco Sol");
        assert_eq!(s.arqueo_tolerance, 50.0);
        assert_eq!(s.default_min_stock, 5.0);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn validation_rules() {
        let ok = StoreSettings::default();
        assert!(ok.validate().is_ok());

        let cases = [
            StoreSettings { business_name: "  ".into(), ..ok.clone() },
            StoreSettings { cuit: "20-12345678-9".into(), ..ok.clone() },
            StoreSettings { daily_goal: -1.0, ..ok.clone() },
            StoreSettings { max_discount_pct: 120.0, ..ok.clone() },
            StoreSettings { ticket_width_mm: 70, ..ok.clone() },
        ];
        for case in cases {
            assert!(case.validate().is_err(), "{case:?}");
        }
    }

    #[test]
    fn cuit_check_digit() {
        assert!(validate_cuit("20-12345678-6").is_ok());
        assert!(validate_cuit("30712345671").is_ok());
        assert!(validate_cuit("30-71234567-2").is_err());
        assert!(validate_cuit("20-1234-6").is_err());
        assert!(validate_cuit("2O-12345678-6").is_err());
    }

    #[test]
    fn save_payload_round_trips_through_parser() {
        let settings = StoreSettings {
            business_name: "Tayrona; Sucursal 2".into(),
            daily_goal: 180_000.0,
            max_discount_pct: 12.5,
            ..StoreSettings::default()
        };
        let parsed = parse_settings(&save_payload(&settings));
        assert_eq!(parsed, settings);
        assert_eq!(to_object(&settings)["meta_diaria"], "180000.00");
    }

    #[test]
    fn local_copy_mirrors_daily_goal() {
        let db = db::open_in_memory().expect("db");
        assert_eq!(load_local(&db), StoreSettings::default());

        let settings = StoreSettings {
            phone: "11 5555-0000".into(),
            daily_goal: 90_000.0,
            ..StoreSettings::default()
        };
        store_local(&db, &settings).expect("store");
        assert_eq!(load_local(&db), settings);
        assert_eq!(sales::load_daily_goal(&db), Some(90_000.0));
    }

    #[tokio::test]
    async fn save_with_expired_session_keeps_local_copy() {
        let db = db::open_in_memory().expect("db");
        let base = crate::api::test_backend::serve(403, "");
        let api = ApiClient::new(&base, std::time::Duration::from_secs(5)).expect("client");
        let settings = StoreSettings {
            daily_goal: 50_000.0,
            ..StoreSettings::default()
        };
        let err = save(&api, &db, &settings).await.expect_err("forbidden");
        assert!(err.is_auth_failure());
        assert_eq!(load_local(&db), StoreSettings::default());
    }
}
