//! Sales history and reporting.
//!
//! Date range presets, the report behind the sales screen (totals,
//! breakdowns, top products), period-over-period comparison and progress
//! against the daily goal.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::api::{endpoints, ApiClient, ApiError};
use crate::data_helpers::{
    de_f64, de_id, de_opt_f64, de_opt_string, de_opt_timestamp, extract_array, parse_rows,
};
use crate::db::{self, DbState};
use crate::money::{self, round2};

/// Local setting holding the daily sales goal.
pub const GOAL_CATEGORY: &str = "dashboard";
pub const GOAL_KEY: &str = "meta_diaria";

pub const DEFAULT_TOP_PRODUCTS: usize = 10;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Efectivo,
    Tarjeta,
    Transferencia,
    Qr,
    Otro,
}

impl PaymentMethod {
    pub fn from_value(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "efectivo" | "cash" | "contado" => Self::Efectivo,
            "tarjeta" | "debito" | "débito" | "credito" | "crédito" | "tarjeta_debito"
            | "tarjeta_credito" | "card" => Self::Tarjeta,
            "transferencia" | "transfer" | "cbu" | "alias" => Self::Transferencia,
            "qr" | "mercadopago" | "mercado_pago" | "mp" | "billetera" => Self::Qr,
            _ => Self::Otro,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Efectivo => "efectivo",
            Self::Tarjeta => "tarjeta",
            Self::Transferencia => "transferencia",
            Self::Qr => "qr",
            Self::Otro => "otro",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Efectivo => "Efectivo",
            Self::Tarjeta => "Tarjeta",
            Self::Transferencia => "Transferencia",
            Self::Qr => "QR / Mercado Pago",
            Self::Otro => "Otro",
        }
    }
}

fn de_method<'de, D>(deserializer: D) -> Result<PaymentMethod, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(v.as_str().map(PaymentMethod::from_value).unwrap_or(PaymentMethod::Otro))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Completada,
    Pendiente,
    Cancelada,
}

impl SaleStatus {
    pub fn from_value(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "cancelada" | "cancelado" | "anulada" | "anulado" | "cancelled" | "devuelta" => {
                Self::Cancelada
            }
            "pendiente" | "pending" => Self::Pendiente,
            _ => Self::Completada,
        }
    }
}

fn de_status<'de, D>(deserializer: D) -> Result<SaleStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(v.as_str().map(SaleStatus::from_value).unwrap_or(SaleStatus::Completada))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaleItem {
    #[serde(rename = "producto_id", alias = "id_producto", default, deserialize_with = "de_id")]
    pub product_id: String,
    #[serde(rename = "nombre", alias = "producto", default)]
    pub name: String,
    #[serde(rename = "cantidad", default, deserialize_with = "de_f64")]
    pub quantity: f64,
    #[serde(rename = "precio_unitario", alias = "precio", default, deserialize_with = "de_f64")]
    pub unit_price: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub subtotal: f64,
    #[serde(rename = "precio_costo", alias = "costo", default, deserialize_with = "de_opt_f64")]
    pub unit_cost: Option<f64>,
}

impl SaleItem {
    pub fn line_total(&self) -> f64 {
        if self.subtotal > 0.0 {
            self.subtotal
        } else {
            round2(self.quantity * self.unit_price)
        }
    }

    pub fn line_cost(&self) -> Option<f64> {
        self.unit_cost.map(|c| round2(c * self.quantity))
    }
}

/// Items arrive either as an array or as a JSON-encoded string column.
fn de_items<'de, D>(deserializer: D) -> Result<Vec<SaleItem>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    let rows = match v {
        Value::Array(rows) => rows,
        Value::String(s) if !s.trim().is_empty() => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Ok(parse_rows(rows, "item_venta"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    #[serde(alias = "id_venta", deserialize_with = "de_id")]
    pub id: String,
    #[serde(rename = "fecha", alias = "fecha_venta", default, deserialize_with = "de_opt_timestamp")]
    pub at: Option<NaiveDateTime>,
    #[serde(rename = "monto_total", alias = "total", default, deserialize_with = "de_f64")]
    pub total: f64,
    #[serde(rename = "metodo_pago", default = "default_method", deserialize_with = "de_method")]
    pub payment_method: PaymentMethod,
    #[serde(rename = "descuento", default, deserialize_with = "de_f64")]
    pub discount: f64,
    #[serde(default, alias = "detalle", deserialize_with = "de_items")]
    pub items: Vec<SaleItem>,
    #[serde(rename = "usuario", alias = "cajero", default, deserialize_with = "de_opt_string")]
    pub user: Option<String>,
    #[serde(rename = "estado", default = "default_status", deserialize_with = "de_status")]
    pub status: SaleStatus,
}

fn default_method() -> PaymentMethod {
    PaymentMethod::Otro
}

fn default_status() -> SaleStatus {
    SaleStatus::Completada
}

impl Sale {
    pub fn is_cancelled(&self) -> bool {
        self.status == SaleStatus::Cancelada
    }

    /// Cost of goods, known only when every item carries a cost.
    pub fn cost(&self) -> Option<f64> {
        if self.items.is_empty() {
            return None;
        }
        self.items
            .iter()
            .map(SaleItem::line_cost)
            .sum::<Option<f64>>()
            .map(round2)
    }
}

pub fn parse_sales(payload: &Value) -> Vec<Sale> {
    parse_rows(
        extract_array(payload, &["ventas", "detalle_ventas", "registros", "detalle"]),
        "venta",
    )
}

// ---------------------------------------------------------------------------
// Date ranges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePreset {
    Hoy,
    Ayer,
    Ultimos7,
    EsteMes,
    MesAnterior,
}

impl RangePreset {
    pub fn from_value(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "hoy" | "today" => Some(Self::Hoy),
            "ayer" | "yesterday" => Some(Self::Ayer),
            "7d" | "semana" | "ultimos7" | "ultimos_7" | "ultimos-7-dias" => Some(Self::Ultimos7),
            "mes" | "este_mes" | "este-mes" => Some(Self::EsteMes),
            "mes_anterior" | "mes-anterior" => Some(Self::MesAnterior),
            _ => None,
        }
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, String> {
        if from > to {
            return Err(format!(
                "La fecha inicial ({from}) es posterior a la final ({to})"
            ));
        }
        Ok(Self { from, to })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    pub fn preset(preset: RangePreset, today: NaiveDate) -> Self {
        match preset {
            RangePreset::Hoy => Self::single(today),
            RangePreset::Ayer => Self::single(today - Duration::days(1)),
            RangePreset::Ultimos7 => Self {
                from: today - Duration::days(6),
                to: today,
            },
            RangePreset::EsteMes => Self {
                from: first_of_month(today),
                to: today,
            },
            RangePreset::MesAnterior => {
                let last = first_of_month(today) - Duration::days(1);
                Self {
                    from: first_of_month(last),
                    to: last,
                }
            }
        }
    }

    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    /// The range of equal length ending the day before this one starts.
    pub fn previous(&self) -> Self {
        let to = self.from - Duration::days(1);
        Self {
            from: to - Duration::days(self.days() - 1),
            to,
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.from && day <= self.to
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("fecha_inicio", self.from.format("%Y-%m-%d").to_string()),
            ("fecha_fin", self.to.format("%Y-%m-%d").to_string()),
        ]
    }
}

fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MethodBreakdown {
    pub method: PaymentMethod,
    pub label: &'static str,
    pub count: usize,
    pub total: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourBucket {
    pub hour: u32,
    pub count: usize,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub count: usize,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopProduct {
    pub product_id: String,
    pub name: String,
    pub quantity: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SalesReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<DateRange>,
    pub gross: f64,
    pub count: usize,
    pub average_ticket: f64,
    pub discounts: f64,
    pub cost: Option<f64>,
    pub margin: Option<f64>,
    pub margin_pct: Option<f64>,
    pub cancelled_count: usize,
    pub cancelled_total: f64,
    pub by_method: Vec<MethodBreakdown>,
    pub by_hour: Vec<HourBucket>,
    pub by_day: Vec<DayBucket>,
    pub top_products: Vec<TopProduct>,
}

impl SalesReport {
    pub fn busiest_hour(&self) -> Option<&HourBucket> {
        self.by_hour
            .iter()
            .max_by(|a, b| a.total.total_cmp(&b.total).then(b.hour.cmp(&a.hour)))
    }

    pub fn dominant_method(&self) -> Option<&MethodBreakdown> {
        self.by_method.first()
    }
}

/// Build the report for `sales`. When `range` is given, dated sales outside
/// it are ignored.
pub fn build_report(sales: &[Sale], range: Option<DateRange>, top_n: usize) -> SalesReport {
    let mut report = SalesReport {
        range,
        ..Default::default()
    };

    let mut by_method: BTreeMap<PaymentMethod, (usize, f64)> = BTreeMap::new();
    let mut by_hour: BTreeMap<u32, (usize, f64)> = BTreeMap::new();
    let mut by_day: BTreeMap<NaiveDate, (usize, f64)> = BTreeMap::new();
    let mut products: HashMap<String, TopProduct> = HashMap::new();
    let mut cost_total = 0.0;
    let mut cost_known = true;

    for sale in sales {
        if let (Some(r), Some(at)) = (range, sale.at) {
            if !r.contains(at.date()) {
                continue;
            }
        }
        if sale.is_cancelled() {
            report.cancelled_count += 1;
            report.cancelled_total += sale.total;
            continue;
        }

        report.count += 1;
        report.gross += sale.total;
        report.discounts += sale.discount.max(0.0);

        match sale.cost() {
            Some(c) => cost_total += c,
            None => cost_known = false,
        }

        let m = by_method.entry(sale.payment_method).or_default();
        m.0 += 1;
        m.1 += sale.total;

        if let Some(at) = sale.at {
            let h = by_hour.entry(at.hour()).or_default();
            h.0 += 1;
            h.1 += sale.total;
            let d = by_day.entry(at.date()).or_default();
            d.0 += 1;
            d.1 += sale.total;
        }

        for item in &sale.items {
            let key = if item.product_id.is_empty() {
                item.name.to_lowercase()
            } else {
                item.product_id.clone()
            };
            let entry = products.entry(key).or_insert_with(|| TopProduct {
                product_id: item.product_id.clone(),
                name: item.name.clone(),
                quantity: 0.0,
                revenue: 0.0,
            });
            entry.quantity += item.quantity;
            entry.revenue += item.line_total();
        }
    }

    report.gross = round2(report.gross);
    report.discounts = round2(report.discounts);
    report.cancelled_total = round2(report.cancelled_total);
    if report.count > 0 {
        report.average_ticket = round2(report.gross / report.count as f64);
        if cost_known {
            let cost = round2(cost_total);
            let margin = round2(report.gross - cost);
            report.cost = Some(cost);
            report.margin = Some(margin);
            report.margin_pct = Some(round2(money::percent_of(margin, report.gross)));
        }
    }

    let gross = report.gross;
    report.by_method = by_method
        .into_iter()
        .map(|(method, (count, total))| MethodBreakdown {
            method,
            label: method.label(),
            count,
            total: round2(total),
            percent: round2(money::percent_of(total, gross)),
        })
        .collect();
    report
        .by_method
        .sort_by(|a, b| b.total.total_cmp(&a.total).then(a.method.cmp(&b.method)));

    report.by_hour = by_hour
        .into_iter()
        .map(|(hour, (count, total))| HourBucket {
            hour,
            count,
            total: round2(total),
        })
        .collect();
    report.by_day = by_day
        .into_iter()
        .map(|(date, (count, total))| DayBucket {
            date,
            count,
            total: round2(total),
        })
        .collect();

    let mut top: Vec<TopProduct> = products
        .into_values()
        .map(|mut p| {
            p.revenue = round2(p.revenue);
            p
        })
        .collect();
    top.sort_by(|a, b| b.revenue.total_cmp(&a.revenue).then(a.name.cmp(&b.name)));
    top.truncate(top_n);
    report.top_products = top;

    debug!(
        count = report.count,
        gross = report.gross,
        cancelled = report.cancelled_count,
        "sales report built"
    );
    report
}

// ---------------------------------------------------------------------------
// Comparison and goal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PeriodComparison {
    pub current_total: f64,
    pub previous_total: f64,
    pub total_change_pct: Option<f64>,
    pub current_count: usize,
    pub previous_count: usize,
    pub count_change_pct: Option<f64>,
    pub average_ticket_change_pct: Option<f64>,
}

pub fn compare(current: &SalesReport, previous: &SalesReport) -> PeriodComparison {
    PeriodComparison {
        current_total: current.gross,
        previous_total: previous.gross,
        total_change_pct: money::percent_change(current.gross, previous.gross),
        current_count: current.count,
        previous_count: previous.count,
        count_change_pct: money::percent_change(current.count as f64, previous.count as f64),
        average_ticket_change_pct: money::percent_change(
            current.average_ticket,
            previous.average_ticket,
        ),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalProgress {
    pub goal: f64,
    pub achieved: f64,
    pub remaining: f64,
    /// Not capped; above 100 when the goal was exceeded.
    pub percent: f64,
    pub reached: bool,
}

/// `None` when no positive goal is set.
pub fn goal_progress(achieved: f64, goal: f64) -> Option<GoalProgress> {
    if !goal.is_finite() || goal <= 0.0 {
        return None;
    }
    let achieved = round2(achieved.max(0.0));
    Some(GoalProgress {
        goal: round2(goal),
        achieved,
        remaining: round2((goal - achieved).max(0.0)),
        percent: round2(money::percent_of(achieved, goal)),
        reached: achieved + money::EPSILON >= goal,
    })
}

pub fn load_daily_goal(db: &DbState) -> Option<f64> {
    let conn = db.conn.lock().ok()?;
    db::get_setting(&conn, GOAL_CATEGORY, GOAL_KEY)
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|g| *g > 0.0)
}

/// Store the daily goal; zero clears it.
pub fn save_daily_goal(db: &DbState, goal: f64) -> Result<(), String> {
    if !goal.is_finite() || goal < 0.0 {
        return Err("La meta diaria debe ser un monto mayor o igual a cero".into());
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    if goal == 0.0 {
        return db::delete_setting(&conn, GOAL_CATEGORY, GOAL_KEY);
    }
    db::set_setting(&conn, GOAL_CATEGORY, GOAL_KEY, &format!("{:.2}", round2(goal)))
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

pub async fn fetch_sales(api: &ApiClient, range: DateRange) -> Result<Vec<Sale>, ApiError> {
    let mut query = range.query();
    query.push(("accion", "ventas_detalle".to_string()));
    let payload = api
        .get_with_fallback(endpoints::FINANCIAL_REPORTS, endpoints::SALES, &query)
        .await?;
    let sales = parse_sales(&payload);
    if sales.is_empty() && !payload.is_array() {
        warn!(from = %range.from, to = %range.to, "sales response without rows");
    }
    Ok(sales)
}

pub async fn fetch_report(
    api: &ApiClient,
    range: DateRange,
    top_n: usize,
) -> Result<SalesReport, ApiError> {
    let sales = fetch_sales(api, range).await?;
    Ok(build_report(&sales, Some(range), top_n))
}

/// Report for `range` together with the equal-length period before it.
pub async fn fetch_with_comparison(
    api: &ApiClient,
    range: DateRange,
    top_n: usize,
) -> Result<(SalesReport, SalesReport, PeriodComparison), ApiError> {
    let previous_range = range.previous();
    let (current, previous) = tokio::try_join!(
        fetch_report(api, range, top_n),
        fetch_report(api, previous_range, top_n)
    )?;
    let comparison = compare(&current, &previous);
    Ok((current, previous, comparison))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn sample_sales() -> Vec<Sale> {
        parse_sales(&json!({
            "ventas": [
                {
                    "id": 1, "fecha": "2024-05-10 09:15:00", "monto_total": "1500",
                    "metodo_pago": "efectivo", "descuento": "0",
                    "items": [
                        { "producto_id": 7, "nombre": "Yerba 1kg", "cantidad": 1, "precio_unitario": 1500, "precio_costo": 1000 }
                    ]
                },
                {
                    "id": 2, "fecha": "2024-05-10 18:40:00", "monto_total": 4500,
                    "metodo_pago": "Débito", "descuento": 500,
                    "items": "[{\"producto_id\":8,\"nombre\":\"Fernet\",\"cantidad\":1,\"subtotal\":4500,\"precio_costo\":3000}]"
                },
                {
                    "id": 3, "fecha": "2024-05-11 18:05:00", "monto_total": 3000,
                    "metodo_pago": "mercadopago",
                    "items": [
                        { "producto_id": 7, "nombre": "Yerba 1kg", "cantidad": 2, "precio_unitario": 1500, "precio_costo": 1000 }
                    ]
                },
                {
                    "id": 4, "fecha": "2024-05-11 19:00:00", "monto_total": 900,
                    "metodo_pago": "efectivo", "estado": "anulada"
                },
                { "fecha": "2024-05-11 19:30:00", "monto_total": 1 }
            ]
        }))
    }

    #[test]
    fn parses_lenient_sales() {
        let sales = sample_sales();
        assert_eq!(sales.len(), 4, "row without id is skipped");
        assert_eq!(sales[1].payment_method, PaymentMethod::Tarjeta);
        assert_eq!(sales[1].items.len(), 1);
        assert_eq!(sales[1].items[0].line_total(), 4500.0);
        assert_eq!(sales[2].payment_method, PaymentMethod::Qr);
        assert!(sales[3].is_cancelled());
        assert_eq!(sales[3].cost(), None);
    }

    #[test]
    fn report_totals_and_breakdowns() {
        let report = build_report(&sample_sales(), None, 5);
        assert_eq!(report.count, 3);
        assert_eq!(report.gross, 9000.0);
        assert_eq!(report.average_ticket, 3000.0);
        assert_eq!(report.discounts, 500.0);
        assert_eq!(report.cancelled_count, 1);
        assert_eq!(report.cancelled_total, 900.0);
        assert_eq!(report.cost, Some(6000.0));
        assert_eq!(report.margin, Some(3000.0));
        assert_eq!(report.margin_pct, Some(33.33));

        let methods: Vec<PaymentMethod> = report.by_method.iter().map(|m| m.method).collect();
        assert_eq!(
            methods,
            vec![PaymentMethod::Tarjeta, PaymentMethod::Qr, PaymentMethod::Efectivo]
        );
        assert_eq!(report.by_method[0].percent, 50.0);

        let hours: Vec<u32> = report.by_hour.iter().map(|h| h.hour).collect();
        assert_eq!(hours, vec![9, 18]);
        assert_eq!(report.busiest_hour().map(|h| h.hour), Some(18));
        assert_eq!(report.by_day.len(), 2);
        assert_eq!(report.by_day[0].total, 6000.0);

        assert_eq!(report.top_products[0].name, "Fernet");
        assert_eq!(report.top_products[1].name, "Yerba 1kg");
        assert_eq!(report.top_products[1].quantity, 3.0);
        assert_eq!(report.top_products[1].revenue, 4500.0);
    }

    #[test]
    fn report_respects_range_and_unknown_cost() {
        let mut sales = sample_sales();
        sales[0].items[0].unit_cost = None;
        let report = build_report(&sales, Some(DateRange::single(day(2024, 5, 10))), 5);
        assert_eq!(report.count, 2);
        assert_eq!(report.gross, 6000.0);
        assert_eq!(report.cancelled_count, 0);
        assert_eq!(report.cost, None);
        assert_eq!(report.margin, None);
    }

    #[test]
    fn empty_report_has_no_average() {
        let report = build_report(&[], None, 5);
        assert_eq!(report.count, 0);
        assert_eq!(report.average_ticket, 0.0);
        assert!(report.busiest_hour().is_none());
    }

    #[test]
    fn presets_and_previous_period() {
        let today = day(2024, 3, 15);
        assert_eq!(DateRange::preset(RangePreset::Hoy, today), DateRange::single(today));
        assert_eq!(
            DateRange::preset(RangePreset::Ayer, today),
            DateRange::single(day(2024, 3, 14))
        );

        let week = DateRange::preset(RangePreset::Ultimos7, today);
        assert_eq!(week.from, day(2024, 3, 9));
        assert_eq!(week.days(), 7);
        assert_eq!(week.previous(), DateRange::new(day(2024, 3, 2), day(2024, 3, 8)).expect("range"));

        let month = DateRange::preset(RangePreset::EsteMes, today);
        assert_eq!(month.from, day(2024, 3, 1));
        assert_eq!(month.previous(), DateRange::new(day(2024, 2, 15), day(2024, 2, 29)).expect("range"));

        let last_month = DateRange::preset(RangePreset::MesAnterior, day(2024, 1, 10));
        assert_eq!(last_month.from, day(2023, 12, 1));
        assert_eq!(last_month.to, day(2023, 12, 31));

        assert!(DateRange::new(day(2024, 3, 2), day(2024, 3, 1)).is_err());
        assert_eq!(RangePreset::from_value("Semana"), Some(RangePreset::Ultimos7));
        assert_eq!(RangePreset::from_value("trimestre"), None);
    }

    #[test]
    fn comparison_against_previous_period() {
        let current = build_report(&sample_sales(), None, 5);
        let previous = SalesReport {
            gross: 6000.0,
            count: 3,
            average_ticket: 2000.0,
            ..Default::default()
        };
        let cmp = compare(&current, &previous);
        assert_eq!(cmp.total_change_pct, Some(50.0));
        assert_eq!(cmp.count_change_pct, Some(0.0));
        assert_eq!(cmp.average_ticket_change_pct, Some(50.0));

        let cmp = compare(&current, &SalesReport::default());
        assert_eq!(cmp.total_change_pct, None);
    }

    #[test]
    fn goal_progress_and_storage() {
        assert!(goal_progress(100.0, 0.0).is_none());
        let p = goal_progress(75_000.0, 100_000.0).expect("goal set");
        assert_eq!(p.percent, 75.0);
        assert_eq!(p.remaining, 25_000.0);
        assert!(!p.reached);
        let p = goal_progress(120_000.0, 100_000.0).expect("goal set");
        assert_eq!(p.percent, 120.0);
        assert_eq!(p.remaining, 0.0);
        assert!(p.reached);

        let db = db::open_in_memory().expect("db");
        assert_eq!(load_daily_goal(&db), None);
        save_daily_goal(&db, 150_000.0).expect("save");
        assert_eq!(load_daily_goal(&db), Some(150_000.0));
        save_daily_goal(&db, 0.0).expect("clear");
        assert_eq!(load_daily_goal(&db), None);
        assert!(save_daily_goal(&db, -5.0).is_err());
    }
}
