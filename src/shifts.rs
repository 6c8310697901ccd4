//! Cashier shifts ("turnos") and cash-drawer reconciliation ("arqueo").
//!
//! Three views of the same cash:
//! - the **ledger**: every shift event in order with a running balance,
//! - the **per-turno reconciliation**: expected vs counted cash at close,
//! - the **arqueo** of the open turno from the backend's cash summary.
//!
//! Balances are carried in whole cents so the ledger's final balance is
//! exactly the sum of its deltas.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::api::{endpoints, ApiClient, ApiError};
use crate::data_helpers::{
    de_bool, de_f64, de_id, de_opt_f64, de_opt_string, de_opt_timestamp, extract_array, parse_rows,
};
use crate::money::{self, round2, to_cents};

/// Default tolerance for calling a drawer "cuadrado".
pub const DEFAULT_TOLERANCE: f64 = 10.0;

/// Argentine peso bills and coins accepted in a denomination count.
pub const ARS_DENOMINATIONS: &[f64] = &[
    20000.0, 10000.0, 2000.0, 1000.0, 500.0, 200.0, 100.0, 50.0, 20.0, 10.0, 5.0, 2.0, 1.0,
];

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftEventKind {
    Apertura,
    Cierre,
    Ingreso,
    Egreso,
    Venta,
    Retiro,
}

impl ShiftEventKind {
    pub fn from_value(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "apertura" | "abrir" | "abrir_turno" | "open" => Some(Self::Apertura),
            "cierre" | "cerrar" | "cerrar_turno" | "close" => Some(Self::Cierre),
            "ingreso" | "entrada" | "deposito" => Some(Self::Ingreso),
            "egreso" | "gasto" | "salida" | "pago" => Some(Self::Egreso),
            "venta" | "venta_efectivo" => Some(Self::Venta),
            "retiro" | "extraccion" => Some(Self::Retiro),
            _ => None,
        }
    }

    /// Kinds that set the balance instead of moving it.
    pub fn sets_balance(&self) -> bool {
        matches!(self, Self::Apertura | Self::Cierre)
    }
}

fn de_kind<'de, D>(deserializer: D) -> Result<ShiftEventKind, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    ShiftEventKind::from_value(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("tipo de movimiento desconocido: {raw}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftEvent {
    #[serde(default, deserialize_with = "de_id")]
    pub id: String,
    #[serde(rename = "turno_id", default, deserialize_with = "de_id")]
    pub shift_id: String,
    #[serde(rename = "tipo", alias = "tipo_evento", deserialize_with = "de_kind")]
    pub kind: ShiftEventKind,
    #[serde(rename = "monto", default, deserialize_with = "de_f64")]
    pub amount: f64,
    #[serde(rename = "fecha", default, deserialize_with = "de_opt_timestamp")]
    pub at: Option<NaiveDateTime>,
    #[serde(rename = "usuario", default, deserialize_with = "de_opt_string")]
    pub user: Option<String>,
    #[serde(rename = "monto_esperado", default, deserialize_with = "de_opt_f64")]
    pub expected: Option<f64>,
    #[serde(
        rename = "observaciones",
        alias = "motivo",
        default,
        deserialize_with = "de_opt_string"
    )]
    pub note: Option<String>,
}

/// Chronological order; undated events keep their relative order at the end.
fn sort_chronologically(events: &[ShiftEvent]) -> Vec<ShiftEvent> {
    let mut sorted = events.to_vec();
    sorted.sort_by(|a, b| match (a.at, b.at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    sorted
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LedgerLine {
    pub event: ShiftEvent,
    pub balance_before: f64,
    pub delta: f64,
    pub balance_after: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Ledger {
    pub lines: Vec<LedgerLine>,
    pub final_balance: f64,
    pub total_delta: f64,
}

/// Walk the events in order carrying a running balance from zero.
///
/// Apertura and cierre set the balance to their amount (the delta is the
/// jump from the previous balance); ingreso and venta add their absolute
/// amount; egreso and retiro subtract it.
pub fn build_ledger(events: &[ShiftEvent]) -> Ledger {
    let mut balance: i64 = 0;
    let mut total_delta: i64 = 0;
    let mut lines = Vec::with_capacity(events.len());

    for event in sort_chronologically(events) {
        let amount = to_cents(event.amount);
        let delta = match event.kind {
            ShiftEventKind::Apertura | ShiftEventKind::Cierre => amount - balance,
            ShiftEventKind::Ingreso | ShiftEventKind::Venta => amount.abs(),
            ShiftEventKind::Egreso | ShiftEventKind::Retiro => -amount.abs(),
        };
        let before = balance;
        balance += delta;
        total_delta += delta;
        lines.push(LedgerLine {
            event,
            balance_before: cents_to_f64(before),
            delta: cents_to_f64(delta),
            balance_after: cents_to_f64(balance),
        });
    }

    Ledger {
        lines,
        final_balance: cents_to_f64(balance),
        total_delta: cents_to_f64(total_delta),
    }
}

fn cents_to_f64(cents: i64) -> f64 {
    cents as f64 / 100.0
}

// ---------------------------------------------------------------------------
// Per-turno reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationStatus {
    Abierto,
    Cuadrado,
    Sobrante,
    Faltante,
}

impl ReconciliationStatus {
    pub fn from_difference(difference: f64, tolerance: f64) -> Self {
        if difference.abs() <= tolerance.abs() {
            Self::Cuadrado
        } else if difference > 0.0 {
            Self::Sobrante
        } else {
            Self::Faltante
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Abierto => "Abierto",
            Self::Cuadrado => "Cuadrado",
            Self::Sobrante => "Sobrante",
            Self::Faltante => "Faltante",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShiftReconciliation {
    pub shift_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<NaiveDateTime>,
    pub opening: f64,
    pub sales: f64,
    pub income: f64,
    pub outflows: f64,
    /// Expected cash at close: the backend's figure when the close event
    /// carries one, otherwise opening + sales + income - outflows.
    pub expected: f64,
    pub counted: Option<f64>,
    pub difference: Option<f64>,
    pub status: ReconciliationStatus,
    /// Opening amount minus the previous turno's counted close.
    pub opening_gap: Option<f64>,
}

impl ShiftReconciliation {
    fn new(shift_id: String) -> Self {
        Self {
            shift_id,
            user: None,
            opened_at: None,
            closed_at: None,
            opening: 0.0,
            sales: 0.0,
            income: 0.0,
            outflows: 0.0,
            expected: 0.0,
            counted: None,
            difference: None,
            status: ReconciliationStatus::Abierto,
            opening_gap: None,
        }
    }

    fn computed_expected(&self) -> f64 {
        round2(self.opening + self.sales + self.income - self.outflows)
    }
}

/// Group events into turnos and reconcile each one.
///
/// Events without a turno id belong to the most recently opened turno.
/// Output keeps the order in which turnos were opened.
pub fn reconcile_shifts(events: &[ShiftEvent], tolerance: f64) -> Vec<ShiftReconciliation> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, ShiftReconciliation> = HashMap::new();
    let mut backend_expected: HashMap<String, f64> = HashMap::new();
    let mut current: Option<String> = None;
    let mut anonymous = 0usize;

    for event in sort_chronologically(events) {
        let shift_id = if !event.shift_id.is_empty() {
            event.shift_id.clone()
        } else if event.kind == ShiftEventKind::Apertura {
            anonymous += 1;
            format!("sin-id-{anonymous}")
        } else if let Some(id) = &current {
            id.clone()
        } else {
            warn!(event_id = %event.id, kind = ?event.kind, "shift event outside any turno, skipped");
            continue;
        };

        if !by_id.contains_key(&shift_id) {
            order.push(shift_id.clone());
            by_id.insert(shift_id.clone(), ShiftReconciliation::new(shift_id.clone()));
        }
        let Some(rec) = by_id.get_mut(&shift_id) else {
            continue;
        };
        if rec.user.is_none() {
            rec.user = event.user.clone();
        }

        let amount = event.amount.abs();
        match event.kind {
            ShiftEventKind::Apertura => {
                rec.opening = event.amount;
                rec.opened_at = event.at;
                current = Some(shift_id.clone());
            }
            ShiftEventKind::Venta => rec.sales += amount,
            ShiftEventKind::Ingreso => rec.income += amount,
            ShiftEventKind::Egreso | ShiftEventKind::Retiro => rec.outflows += amount,
            ShiftEventKind::Cierre => {
                rec.counted = Some(event.amount);
                rec.closed_at = event.at;
                if let Some(expected) = event.expected {
                    backend_expected.insert(shift_id.clone(), expected);
                }
                if current.as_deref() == Some(shift_id.as_str()) {
                    current = None;
                }
            }
        }
    }

    let mut previous_counted: Option<f64> = None;
    let mut result = Vec::with_capacity(order.len());
    for id in order {
        let Some(mut rec) = by_id.remove(&id) else {
            continue;
        };
        rec.sales = round2(rec.sales);
        rec.income = round2(rec.income);
        rec.outflows = round2(rec.outflows);

        let computed = rec.computed_expected();
        rec.expected = match backend_expected.get(&id) {
            Some(server) => {
                if !money::approx_eq(*server, computed) && (rec.sales + rec.income + rec.outflows) > 0.0 {
                    warn!(
                        turno_id = %id,
                        server = *server,
                        computed,
                        "expected cash differs from backend figure"
                    );
                }
                round2(*server)
            }
            None => computed,
        };

        if rec.opened_at.is_some() {
            rec.opening_gap = previous_counted.map(|prev| round2(rec.opening - prev));
        }
        if let Some(counted) = rec.counted {
            let difference = round2(counted - rec.expected);
            rec.difference = Some(difference);
            rec.status = ReconciliationStatus::from_difference(difference, tolerance);
            previous_counted = Some(counted);
        }
        result.push(rec);
    }
    result
}

// ---------------------------------------------------------------------------
// Arqueo of the open turno
// ---------------------------------------------------------------------------

/// Cash summary of the current turno as reported by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CashSummary {
    #[serde(rename = "turno_id", default, deserialize_with = "de_opt_string")]
    pub shift_id: Option<String>,
    #[serde(rename = "turno_abierto", alias = "caja_abierta", default, deserialize_with = "de_bool")]
    pub is_open: bool,
    #[serde(rename = "usuario", alias = "cajero", default, deserialize_with = "de_opt_string")]
    pub user: Option<String>,
    #[serde(rename = "abierto_desde", alias = "fecha_apertura", default, deserialize_with = "de_opt_timestamp")]
    pub opened_at: Option<NaiveDateTime>,
    #[serde(rename = "monto_inicial", alias = "monto_apertura", default, deserialize_with = "de_f64")]
    pub opening: f64,
    #[serde(rename = "ventas_efectivo", default, deserialize_with = "de_f64")]
    pub cash_sales: f64,
    #[serde(rename = "ventas_tarjeta", default, deserialize_with = "de_f64")]
    pub card_sales: f64,
    #[serde(rename = "ventas_transferencia", default, deserialize_with = "de_f64")]
    pub transfer_sales: f64,
    #[serde(rename = "ventas_qr", alias = "ventas_mercadopago", default, deserialize_with = "de_f64")]
    pub qr_sales: f64,
    #[serde(rename = "ingresos", alias = "ingresos_extra", default, deserialize_with = "de_f64")]
    pub income: f64,
    #[serde(rename = "egresos", alias = "retiros", default, deserialize_with = "de_f64")]
    pub outflows: f64,
    #[serde(rename = "cantidad_ventas", alias = "num_ventas", default, deserialize_with = "de_f64")]
    pub sales_count: f64,
}

impl CashSummary {
    /// Cash that should be in the drawer right now.
    pub fn expected_cash(&self) -> f64 {
        round2(self.opening + self.cash_sales + self.income - self.outflows.abs())
    }

    pub fn electronic_sales(&self) -> f64 {
        round2(self.card_sales + self.transfer_sales + self.qr_sales)
    }

    pub fn total_sales(&self) -> f64 {
        round2(self.cash_sales + self.electronic_sales())
    }

    pub fn average_ticket(&self) -> f64 {
        if self.sales_count <= 0.0 {
            return 0.0;
        }
        round2(self.total_sales() / self.sales_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DenominationCount {
    pub denomination: f64,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arqueo {
    pub expected: f64,
    pub counted: f64,
    pub difference: f64,
    pub status: ReconciliationStatus,
    pub total_sales: f64,
    pub electronic_sales: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakdown: Vec<DenominationCount>,
}

/// Total of a denomination count. Unknown denominations are rejected.
pub fn count_denominations(counts: &[DenominationCount]) -> Result<f64, String> {
    let mut total: i64 = 0;
    for c in counts {
        if !ARS_DENOMINATIONS
            .iter()
            .any(|d| money::approx_eq(*d, c.denomination))
        {
            return Err(format!(
                "Denominación inválida: {}",
                money::format_ars(c.denomination)
            ));
        }
        total += to_cents(c.denomination) * i64::from(c.quantity);
    }
    Ok(cents_to_f64(total))
}

/// Parse `20000x3,1000x5,100x12` into denomination counts.
pub fn parse_denomination_list(raw: &str) -> Result<Vec<DenominationCount>, String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|part| {
            let (den, qty) = part
                .split_once(['x', 'X', '*'])
                .ok_or_else(|| format!("Formato inválido '{part}', use billetexcantidad"))?;
            let denomination = money::parse_ars(den)
                .ok_or_else(|| format!("Denominación inválida '{den}'"))?;
            let quantity = qty
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("Cantidad inválida '{qty}'"))?;
            Ok(DenominationCount {
                denomination,
                quantity,
            })
        })
        .collect()
}

/// Compare the counted cash against what the drawer should hold.
pub fn arqueo(
    summary: &CashSummary,
    counted: f64,
    breakdown: Vec<DenominationCount>,
    tolerance: f64,
) -> Arqueo {
    let expected = summary.expected_cash();
    let difference = round2(counted - expected);
    Arqueo {
        expected,
        counted: round2(counted),
        difference,
        status: ReconciliationStatus::from_difference(difference, tolerance),
        total_sales: summary.total_sales(),
        electronic_sales: summary.electronic_sales(),
        breakdown,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate_opening_amount(amount: f64) -> Result<f64, String> {
    if !amount.is_finite() || amount < 0.0 {
        return Err("El monto inicial debe ser un número mayor o igual a cero".into());
    }
    Ok(round2(amount))
}

pub fn validate_counted_amount(amount: f64) -> Result<f64, String> {
    if !amount.is_finite() || amount < 0.0 {
        return Err("El monto contado debe ser un número mayor o igual a cero".into());
    }
    Ok(round2(amount))
}

pub fn validate_movement(kind: ShiftEventKind, amount: f64, reason: &str) -> Result<f64, String> {
    if !matches!(
        kind,
        ShiftEventKind::Ingreso | ShiftEventKind::Egreso | ShiftEventKind::Retiro
    ) {
        return Err("Solo se pueden registrar ingresos, egresos o retiros".into());
    }
    if !amount.is_finite() || amount <= 0.0 {
        return Err("El monto del movimiento debe ser mayor a cero".into());
    }
    if reason.trim().is_empty() {
        return Err("Indique el motivo del movimiento".into());
    }
    Ok(round2(amount))
}

// ---------------------------------------------------------------------------
// Remote operations
// ---------------------------------------------------------------------------

/// Parse the cash summary out of a `pos_status.php` or
/// `gestion_caja_completa.php` response.
pub fn parse_cash_summary(payload: &Value) -> Result<CashSummary, String> {
    let source = payload
        .get("caja")
        .or_else(|| payload.get("turno"))
        .or_else(|| payload.get("resumen"))
        .unwrap_or(payload);
    serde_json::from_value::<CashSummary>(source.clone())
        .map_err(|e| format!("Resumen de caja inválido: {e}"))
}

pub async fn fetch_cash_summary(api: &ApiClient) -> Result<CashSummary, ApiError> {
    let payload = api
        .get(endpoints::CASH_MANAGEMENT, &[("accion", "resumen".to_string())])
        .await?;
    parse_cash_summary(&payload).map_err(ApiError::Invalid)
}

/// Open a turno. Fails locally when the backend reports one already open.
pub async fn open_shift(api: &ApiClient, opening: f64) -> Result<Value, ApiError> {
    let opening = validate_opening_amount(opening).map_err(ApiError::Invalid)?;
    let current = fetch_cash_summary(api).await?;
    if current.is_open {
        return Err(ApiError::Invalid(format!(
            "Ya hay un turno abierto{}. Ciérrelo antes de abrir otro.",
            current
                .user
                .as_deref()
                .map(|u| format!(" por {u}"))
                .unwrap_or_default()
        )));
    }
    let result = api
        .post(
            endpoints::CASH_MANAGEMENT,
            &json!({ "accion": "abrir_turno", "monto_inicial": opening }),
        )
        .await?;
    info!(opening, "turno opened");
    Ok(result)
}

/// Close the open turno with the counted cash.
pub async fn close_shift(
    api: &ApiClient,
    counted: f64,
    note: Option<&str>,
    tolerance: f64,
) -> Result<Value, ApiError> {
    let counted = validate_counted_amount(counted).map_err(ApiError::Invalid)?;
    let current = fetch_cash_summary(api).await?;
    if !current.is_open {
        return Err(ApiError::Invalid("No hay un turno abierto para cerrar".into()));
    }
    let local = arqueo(&current, counted, Vec::new(), tolerance);
    if local.status != ReconciliationStatus::Cuadrado {
        warn!(
            expected = local.expected,
            counted,
            difference = local.difference,
            "closing turno with cash difference"
        );
    }
    let result = api
        .post(
            endpoints::CASH_MANAGEMENT,
            &json!({
                "accion": "cerrar_turno",
                "monto_contado": counted,
                "monto_esperado": local.expected,
                "diferencia": local.difference,
                "observaciones": note.unwrap_or_default(),
            }),
        )
        .await?;
    info!(counted, difference = local.difference, "turno closed");
    Ok(json!({ "turno_id": current.shift_id, "arqueo": local, "respuesta": result }))
}

/// Register a cash income, expense or withdrawal in the open turno.
pub async fn register_movement(
    api: &ApiClient,
    kind: ShiftEventKind,
    amount: f64,
    reason: &str,
) -> Result<Value, ApiError> {
    let amount = validate_movement(kind, amount, reason).map_err(ApiError::Invalid)?;
    let tipo = match kind {
        ShiftEventKind::Ingreso => "ingreso",
        ShiftEventKind::Retiro => "retiro",
        _ => "egreso",
    };
    let result = api
        .post(
            endpoints::CASH_MANAGEMENT,
            &json!({
                "accion": "movimiento",
                "tipo": tipo,
                "monto": amount,
                "motivo": reason.trim(),
            }),
        )
        .await?;
    info!(tipo, amount, "cash movement registered");
    Ok(result)
}

pub fn parse_shift_events(payload: &Value) -> Vec<ShiftEvent> {
    parse_rows(
        extract_array(payload, &["eventos", "historial", "movimientos", "turnos"]),
        "evento_turno",
    )
}

/// Shift events between two dates (inclusive).
pub async fn fetch_history(
    api: &ApiClient,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<ShiftEvent>, ApiError> {
    let payload = api
        .get(
            endpoints::CASH_MANAGEMENT,
            &[
                ("accion", "historial".to_string()),
                ("desde", from.format("%Y-%m-%d").to_string()),
                ("hasta", to.format("%Y-%m-%d").to_string()),
            ],
        )
        .await?;
    Ok(parse_shift_events(&payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Option<NaiveDateTime> {
        crate::data_helpers::parse_timestamp(s)
    }

    fn event(shift: &str, kind: ShiftEventKind, amount: f64, at: &str) -> ShiftEvent {
        ShiftEvent {
            id: format!("{shift}-{at}"),
            shift_id: shift.to_string(),
            kind,
            amount,
            at: ts(at),
            user: Some("maria".into()),
            expected: None,
            note: None,
        }
    }

    #[test]
    fn ledger_sets_and_moves_balance() {
        use ShiftEventKind::*;
        // Deliberately out of order.
        let events = vec![
            event("1", Cierre, 15_200.0, "2024-05-01 20:00:00"),
            event("1", Apertura, 10_000.0, "2024-05-01 08:00:00"),
            event("1", Venta, 6_000.0, "2024-05-01 12:00:00"),
            event("1", Egreso, 800.0, "2024-05-01 13:00:00"),
            event("2", Apertura, 15_000.0, "2024-05-02 08:00:00"),
        ];
        let ledger = build_ledger(&events);

        let deltas: Vec<f64> = ledger.lines.iter().map(|l| l.delta).collect();
        assert_eq!(deltas, vec![10_000.0, 6_000.0, -800.0, 0.0, -200.0]);
        assert_eq!(ledger.lines[3].balance_before, 15_200.0);
        assert_eq!(ledger.final_balance, 15_000.0);
        assert_eq!(ledger.total_delta, ledger.final_balance);
    }

    #[test]
    fn ledger_final_balance_equals_sum_of_deltas() {
        use ShiftEventKind::*;
        let kinds = [Apertura, Venta, Ingreso, Egreso, Retiro, Venta, Cierre];
        let events: Vec<ShiftEvent> = (0..70)
            .map(|i| {
                let kind = kinds[i % kinds.len()];
                let amount = 1000.0 + (i as f64) * 37.31;
                event(&format!("{}", i / kinds.len()), kind, amount, &format!("2024-06-01 {:02}:{:02}:00", i / 60, i % 60))
            })
            .collect();
        let ledger = build_ledger(&events);
        let sum: f64 = ledger.lines.iter().map(|l| l.delta).sum();
        assert!((sum - ledger.final_balance).abs() < 1e-6);
        assert_eq!(ledger.total_delta, ledger.final_balance);
        for pair in ledger.lines.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
    }

    #[test]
    fn reconciliation_per_turno() {
        use ShiftEventKind::*;
        let events = vec![
            event("1", Apertura, 10_000.0, "2024-05-01 08:00:00"),
            event("1", Venta, 6_000.0, "2024-05-01 12:00:00"),
            event("1", Ingreso, 500.0, "2024-05-01 12:30:00"),
            event("1", Egreso, 800.0, "2024-05-01 13:00:00"),
            event("1", Cierre, 15_650.0, "2024-05-01 20:00:00"),
            event("2", Apertura, 15_000.0, "2024-05-02 08:00:00"),
            event("2", Retiro, 2_000.0, "2024-05-02 10:00:00"),
        ];
        let recs = reconcile_shifts(&events, DEFAULT_TOLERANCE);
        assert_eq!(recs.len(), 2);

        let first = &recs[0];
        assert_eq!(first.expected, 15_700.0);
        assert_eq!(first.difference, Some(-50.0));
        assert_eq!(first.status, ReconciliationStatus::Faltante);
        assert_eq!(first.opening_gap, None);

        let second = &recs[1];
        assert_eq!(second.status, ReconciliationStatus::Abierto);
        assert_eq!(second.expected, 13_000.0);
        assert_eq!(second.opening_gap, Some(-650.0));
        assert_eq!(second.counted, None);
    }

    #[test]
    fn reconciliation_prefers_backend_expected_and_tolerance() {
        use ShiftEventKind::*;
        let mut close = event("9", Cierre, 20_005.0, "2024-05-03 20:00:00");
        close.expected = Some(20_000.0);
        let events = vec![event("9", Apertura, 5_000.0, "2024-05-03 08:00:00"), close];
        let recs = reconcile_shifts(&events, DEFAULT_TOLERANCE);
        assert_eq!(recs[0].expected, 20_000.0);
        assert_eq!(recs[0].difference, Some(5.0));
        assert_eq!(recs[0].status, ReconciliationStatus::Cuadrado);

        let recs = reconcile_shifts(&events, 1.0);
        assert_eq!(recs[0].status, ReconciliationStatus::Sobrante);
    }

    #[test]
    fn events_without_turno_join_the_open_one() {
        use ShiftEventKind::*;
        let events = vec![
            event("", Venta, 100.0, "2024-05-01 07:00:00"),
            event("", Apertura, 1_000.0, "2024-05-01 08:00:00"),
            event("", Venta, 250.0, "2024-05-01 09:00:00"),
        ];
        let recs = reconcile_shifts(&events, DEFAULT_TOLERANCE);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].shift_id, "sin-id-1");
        assert_eq!(recs[0].sales, 250.0);
    }

    #[test]
    fn parses_history_rows() {
        let payload = serde_json::json!({
            "success": true,
            "historial": [
                { "id": 1, "turno_id": 3, "tipo": "abrir", "monto": "5000", "fecha": "2024-05-01 08:00:00" },
                { "id": 2, "turno_id": 3, "tipo": "GASTO", "monto": "-300.50", "motivo": "Hielo" },
                { "id": 3, "turno_id": 3, "tipo": "desconocido", "monto": 1 }
            ]
        });
        let events = parse_shift_events(&payload);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ShiftEventKind::Apertura);
        assert_eq!(events[0].shift_id, "3");
        assert_eq!(events[1].kind, ShiftEventKind::Egreso);
        assert_eq!(events[1].note.as_deref(), Some("Hielo"));
    }

    #[test]
    fn arqueo_against_cash_summary() {
        let summary = parse_cash_summary(&serde_json::json!({
            "caja": {
                "turno_abierto": 1,
                "monto_inicial": "10000",
                "ventas_efectivo": 25_000,
                "ventas_tarjeta": "12000.50",
                "ventas_transferencia": 3000,
                "ventas_qr": 1500,
                "ingresos": 500,
                "egresos": 2000,
                "cantidad_ventas": 3
            }
        }))
        .expect("summary parses");
        assert!(summary.is_open);
        assert_eq!(summary.expected_cash(), 33_500.0);
        assert_eq!(summary.electronic_sales(), 16_500.5);
        assert_eq!(summary.total_sales(), 41_500.5);
        assert_eq!(summary.average_ticket(), 13_833.5);

        let result = arqueo(&summary, 33_400.0, Vec::new(), DEFAULT_TOLERANCE);
        assert_eq!(result.difference, -100.0);
        assert_eq!(result.status, ReconciliationStatus::Faltante);
    }

    #[test]
    fn denomination_counts() {
        let counts = parse_denomination_list("20000x1, 1000x5;100*12").expect("parse list");
        assert_eq!(counts.len(), 3);
        assert_eq!(count_denominations(&counts).expect("valid"), 26_200.0);

        let bad = vec![DenominationCount {
            denomination: 300.0,
            quantity: 1,
        }];
        assert!(count_denominations(&bad).is_err());
        assert!(parse_denomination_list("1000-3").is_err());
    }

    #[test]
    fn movement_validation() {
        assert!(validate_movement(ShiftEventKind::Egreso, 100.0, "Proveedor").is_ok());
        assert!(validate_movement(ShiftEventKind::Egreso, 0.0, "Proveedor").is_err());
        assert!(validate_movement(ShiftEventKind::Ingreso, 10.0, "  ").is_err());
        assert!(validate_movement(ShiftEventKind::Apertura, 10.0, "x").is_err());
        assert!(validate_opening_amount(-1.0).is_err());
        assert_eq!(validate_counted_amount(10.004), Ok(10.0));
        assert!(validate_counted_amount(f64::NAN).is_err());
    }

    #[tokio::test]
    async fn shift_writes_keep_auth_failures_typed() {
        let api = ApiClient::new("http://127.0.0.1:9", std::time::Duration::from_millis(200))
            .expect("client");
        let err = open_shift(&api, -10.0).await.expect_err("negative opening");
        assert!(matches!(err, ApiError::Invalid(_)));

        let base = crate::api::test_backend::serve(401, "");
        let api = ApiClient::new(&base, std::time::Duration::from_secs(5)).expect("client");
        let err = register_movement(&api, ShiftEventKind::Ingreso, 500.0, "Cambio")
            .await
            .expect_err("expired session");
        assert!(err.is_auth_failure());
        let err = close_shift(&api, 1000.0, None, 0.0).await.expect_err("expired session");
        assert!(err.is_auth_failure());
    }
}
