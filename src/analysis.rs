//! Business insights for the analysis screen.
//!
//! The backend's `analisis_inteligente.php` is asked first. When it fails or
//! answers nothing usable, a local heuristic pass over the inventory and the
//! sales report produces the same kind of insights.

use chrono::Local;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::api::{endpoints, ApiClient, ApiError};
use crate::data_helpers::{de_opt_string, extract_array, parse_rows};
use crate::inventory::{classify_abc, urgency_score, AbcClass, Product};
use crate::money::{self, percent_change};
use crate::sales::SalesReport;

/// Margin under this percentage of sales is flagged.
pub const LOW_MARGIN_PCT: f64 = 20.0;
/// Period-over-period change that counts as a trend.
pub const TREND_THRESHOLD_PCT: f64 = 10.0;
/// Share of sales cancelled that warrants a look at the register.
pub const CANCELLED_RATIO_PCT: f64 = 5.0;
/// Share of a single payment method worth mentioning.
pub const DOMINANT_METHOD_PCT: f64 = 60.0;

const MAX_NAMES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Stock,
    Ventas,
    Rentabilidad,
    Caja,
}

impl InsightKind {
    fn from_value(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "stock" | "inventario" => Self::Stock,
            "rentabilidad" | "margen" | "precios" => Self::Rentabilidad,
            "caja" | "turno" | "efectivo" => Self::Caja,
            _ => Self::Ventas,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Advertencia,
    Critica,
}

impl Severity {
    fn from_value(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "critica" | "crítica" | "alta" | "critical" | "high" | "error" => Self::Critica,
            "advertencia" | "media" | "warning" | "medium" => Self::Advertencia,
            _ => Self::Info,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Advertencia => "ADVERTENCIA",
            Self::Critica => "CRÍTICA",
        }
    }
}

fn de_kind<'de, D>(deserializer: D) -> Result<InsightKind, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(v.as_str().map(InsightKind::from_value).unwrap_or(InsightKind::Ventas))
}

fn de_severity<'de, D>(deserializer: D) -> Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(v.as_str().map(Severity::from_value).unwrap_or(Severity::Info))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "tipo", alias = "categoria", default = "default_kind", deserialize_with = "de_kind")]
    pub kind: InsightKind,
    #[serde(
        rename = "severidad",
        alias = "prioridad",
        default = "default_severity",
        deserialize_with = "de_severity"
    )]
    pub severity: Severity,
    #[serde(rename = "titulo", alias = "title")]
    pub title: String,
    #[serde(rename = "descripcion", alias = "mensaje", default, deserialize_with = "de_opt_string")]
    pub detail: Option<String>,
}

fn default_kind() -> InsightKind {
    InsightKind::Ventas
}

fn default_severity() -> Severity {
    Severity::Info
}

impl Insight {
    fn new(kind: InsightKind, severity: Severity, title: String, detail: Option<String>) -> Self {
        Self {
            kind,
            severity,
            title,
            detail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Remoto,
    Local,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub source: AnalysisSource,
    pub generated_at: String,
    pub insights: Vec<Insight>,
    /// Why the local analysis was used, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

fn sort_by_severity(insights: &mut [Insight]) {
    insights.sort_by(|a, b| b.severity.cmp(&a.severity));
}

fn names(products: &[&Product]) -> String {
    let mut list: Vec<&str> = products.iter().take(MAX_NAMES).map(|p| p.name.as_str()).collect();
    if products.len() > MAX_NAMES {
        list.push("…");
    }
    list.join(", ")
}

/// Heuristic insights from inventory and sales.
pub fn local_insights(
    products: &[Product],
    current: &SalesReport,
    previous: Option<&SalesReport>,
) -> Vec<Insight> {
    let mut out = Vec::new();

    // Stock
    let out_of_stock: Vec<&Product> = products.iter().filter(|p| p.stock <= 0.0).collect();
    if !out_of_stock.is_empty() {
        out.push(Insight::new(
            InsightKind::Stock,
            Severity::Critica,
            format!("{} productos sin stock", out_of_stock.len()),
            Some(names(&out_of_stock)),
        ));
    }
    let critical: Vec<&Product> = products
        .iter()
        .filter(|p| p.stock > 0.0 && urgency_score(p.stock, p.min_stock) >= 90)
        .collect();
    if !critical.is_empty() {
        out.push(Insight::new(
            InsightKind::Stock,
            Severity::Advertencia,
            format!("{} productos con stock crítico", critical.len()),
            Some(names(&critical)),
        ));
    }
    let abc = classify_abc(products);
    let a_at_risk: Vec<&Product> = products
        .iter()
        .filter(|p| {
            abc.class_of(&p.id) == Some(AbcClass::A) && urgency_score(p.stock, p.min_stock) >= 60
        })
        .collect();
    if !a_at_risk.is_empty() {
        out.push(Insight::new(
            InsightKind::Stock,
            Severity::Critica,
            format!("{} productos clase A por agotarse", a_at_risk.len()),
            Some(format!(
                "Concentran la mayor parte del valor del inventario: {}",
                names(&a_at_risk)
            )),
        ));
    }

    // Sales trend
    if let Some(prev) = previous {
        if let Some(change) = percent_change(current.gross, prev.gross) {
            if change <= -TREND_THRESHOLD_PCT {
                out.push(Insight::new(
                    InsightKind::Ventas,
                    Severity::Advertencia,
                    format!("Ventas en baja {:.1}%", change.abs()),
                    Some(format!(
                        "{} contra {} del período anterior",
                        money::format_ars(current.gross),
                        money::format_ars(prev.gross)
                    )),
                ));
            } else if change >= TREND_THRESHOLD_PCT {
                out.push(Insight::new(
                    InsightKind::Ventas,
                    Severity::Info,
                    format!("Ventas en alza {change:.1}%"),
                    Some(format!(
                        "{} contra {} del período anterior",
                        money::format_ars(current.gross),
                        money::format_ars(prev.gross)
                    )),
                ));
            }
        }
    }
    if let Some(peak) = current.busiest_hour() {
        out.push(Insight::new(
            InsightKind::Ventas,
            Severity::Info,
            format!("Hora pico: {:02}:00 a {:02}:00", peak.hour, (peak.hour + 1) % 24),
            Some(format!(
                "{} ventas por {}",
                peak.count,
                money::format_ars(peak.total)
            )),
        ));
    }
    if let Some(method) = current.dominant_method() {
        if method.percent >= DOMINANT_METHOD_PCT {
            out.push(Insight::new(
                InsightKind::Ventas,
                Severity::Info,
                format!("{} concentra el {:.0}% de las ventas", method.label, method.percent),
                None,
            ));
        }
    }

    // Profitability
    if let Some(margin_pct) = current.margin_pct {
        if margin_pct < LOW_MARGIN_PCT {
            out.push(Insight::new(
                InsightKind::Rentabilidad,
                Severity::Advertencia,
                format!("Margen bajo: {margin_pct:.1}%"),
                Some(format!(
                    "Por debajo del {LOW_MARGIN_PCT:.0}% recomendado. Revise precios y descuentos."
                )),
            ));
        }
    }
    let losing: Vec<&Product> = products
        .iter()
        .filter(|p| p.sale_price > 0.0 && p.sale_price < p.cost_price)
        .collect();
    if !losing.is_empty() {
        out.push(Insight::new(
            InsightKind::Rentabilidad,
            Severity::Critica,
            format!("{} productos se venden por debajo del costo", losing.len()),
            Some(names(&losing)),
        ));
    }

    // Register
    let attempts = current.count + current.cancelled_count;
    if current.cancelled_count > 0 {
        let ratio = money::percent_of(current.cancelled_count as f64, attempts as f64);
        if ratio >= CANCELLED_RATIO_PCT {
            out.push(Insight::new(
                InsightKind::Caja,
                Severity::Advertencia,
                format!("{ratio:.1}% de ventas anuladas"),
                Some(format!(
                    "{} anulaciones por {}",
                    current.cancelled_count,
                    money::format_ars(current.cancelled_total)
                )),
            ));
        }
    }

    sort_by_severity(&mut out);
    out
}

pub fn local_analysis(
    products: &[Product],
    current: &SalesReport,
    previous: Option<&SalesReport>,
    fallback_reason: Option<String>,
) -> Analysis {
    Analysis {
        source: AnalysisSource::Local,
        generated_at: Local::now().to_rfc3339(),
        insights: local_insights(products, current, previous),
        fallback_reason,
    }
}

/// Parse the backend's insights; an empty list is treated as a failure.
pub fn parse_remote(payload: &Value) -> Result<Vec<Insight>, ApiError> {
    let mut insights: Vec<Insight> = parse_rows(
        extract_array(payload, &["insights", "recomendaciones", "analisis", "alertas"]),
        "insight",
    );
    if insights.is_empty() {
        return Err(ApiError::Rejected(
            "El análisis remoto no devolvió resultados".into(),
        ));
    }
    sort_by_severity(&mut insights);
    Ok(insights)
}

pub async fn fetch_remote(api: &ApiClient) -> Result<Analysis, ApiError> {
    let payload = api.get(endpoints::SMART_ANALYSIS, &[]).await?;
    let insights = parse_remote(&payload)?;
    info!(count = insights.len(), "remote analysis received");
    Ok(Analysis {
        source: AnalysisSource::Remoto,
        generated_at: Local::now().to_rfc3339(),
        insights,
        fallback_reason: None,
    })
}

/// Remote analysis, or the local one when the remote fails.
pub async fn analyze(
    api: &ApiClient,
    products: &[Product],
    current: &SalesReport,
    previous: Option<&SalesReport>,
) -> Analysis {
    match fetch_remote(api).await {
        Ok(analysis) => analysis,
        Err(e) => {
            warn!(error = %e, "remote analysis unavailable, using local heuristics");
            local_analysis(products, current, previous, Some(e.to_string()))
        }
    }
}
