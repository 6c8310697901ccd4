//! Inventory analysis: ABC classification, restock urgency, stock status,
//! reorder suggestions and the inventory summary shown on the smart
//! inventory screen.
//!
//! All functions here are pure over a slice of [`Product`]s; fetching lives
//! in [`fetch_products`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::info;

use crate::api::{endpoints, ApiClient, ApiError};
use crate::data_helpers::{
    de_bool, de_f64, de_id, de_opt_f64, de_opt_string, extract_array, parse_rows,
};
use crate::money::{percent_of, round2};

/// Cumulative value share (exclusive) under which a product is class A.
pub const CLASS_A_VALUE_PCT: f64 = 80.0;
/// Rank share (inclusive) within which a product is class A.
pub const CLASS_A_COUNT_PCT: f64 = 20.0;
pub const CLASS_B_VALUE_PCT: f64 = 95.0;
pub const CLASS_B_COUNT_PCT: f64 = 50.0;

/// Days of sales a reorder should cover when no maximum stock is set.
pub const DEFAULT_COVER_DAYS: u32 = 15;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AbcClass {
    A,
    B,
    C,
}

impl Default for AbcClass {
    fn default() -> Self {
        AbcClass::C
    }
}

impl AbcClass {
    pub fn from_value(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim).map(str::to_ascii_uppercase).as_deref() {
            Some("A") => Some(Self::A),
            Some("B") => Some(Self::B),
            Some("C") => Some(Self::C),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

fn de_opt_abc<'de, D>(deserializer: D) -> Result<Option<AbcClass>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(AbcClass::from_value(v.as_str()))
}

fn default_true() -> bool {
    true
}

/// Server-side sellability verdict attached to each product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockInfo {
    #[serde(default = "default_true", deserialize_with = "de_bool")]
    pub puede_vender: bool,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub stock_disponible: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub mensaje: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Product {
    #[serde(deserialize_with = "de_id", alias = "id_producto")]
    pub id: String,
    #[serde(rename = "nombre", alias = "name")]
    pub name: String,
    #[serde(
        rename = "codigo",
        alias = "codigo_barras",
        default,
        deserialize_with = "de_opt_string"
    )]
    pub code: Option<String>,
    #[serde(rename = "categoria", default, deserialize_with = "de_opt_string")]
    pub category: Option<String>,
    #[serde(default, alias = "stock_actual", deserialize_with = "de_f64")]
    pub stock: f64,
    #[serde(rename = "stock_minimo", default, deserialize_with = "de_f64")]
    pub min_stock: f64,
    #[serde(rename = "stock_maximo", default, deserialize_with = "de_opt_f64")]
    pub max_stock: Option<f64>,
    #[serde(rename = "precio_costo", default, deserialize_with = "de_f64")]
    pub cost_price: f64,
    #[serde(
        rename = "precio_venta",
        alias = "precio",
        default,
        deserialize_with = "de_f64"
    )]
    pub sale_price: f64,
    #[serde(rename = "ventas_30_dias", default, deserialize_with = "de_f64")]
    pub units_sold_30d: f64,
    #[serde(rename = "clase_abc", default, deserialize_with = "de_opt_abc")]
    pub abc_class: Option<AbcClass>,
    #[serde(default)]
    pub stock_info: Option<StockInfo>,
}

impl Product {
    /// Stock valued at cost. Negative stock or cost count as zero.
    pub fn inventory_value(&self) -> f64 {
        self.stock.max(0.0) * self.cost_price.max(0.0)
    }

    pub fn retail_value(&self) -> f64 {
        self.stock.max(0.0) * self.sale_price.max(0.0)
    }

    /// Average units sold per day over the last 30 days.
    pub fn daily_velocity(&self) -> f64 {
        (self.units_sold_30d / 30.0).max(0.0)
    }

    /// Units the counter may sell: the server's figure when present.
    pub fn available_stock(&self) -> f64 {
        self.stock_info
            .as_ref()
            .and_then(|i| i.stock_disponible)
            .unwrap_or(self.stock)
    }

    /// Whether `quantity` more units may be sold.
    pub fn check_sellable(&self, quantity: f64) -> Result<(), String> {
        if let Some(info) = &self.stock_info {
            if !info.puede_vender {
                return Err(info
                    .mensaje
                    .clone()
                    .unwrap_or_else(|| format!("{} no está disponible para la venta", self.name)));
            }
        }
        let available = self.available_stock();
        if quantity > available + 1e-9 {
            return Err(format!(
                "Stock insuficiente para {}: disponible {}, solicitado {}",
                self.name,
                fmt_qty(available),
                fmt_qty(quantity)
            ));
        }
        Ok(())
    }

    /// Margin over cost as a percentage of the sale price.
    pub fn margin_pct(&self) -> Option<f64> {
        if self.sale_price <= 0.0 {
            return None;
        }
        Some(round2((self.sale_price - self.cost_price) / self.sale_price * 100.0))
    }
}

pub(crate) fn fmt_qty(q: f64) -> String {
    if (q - q.round()).abs() < 1e-9 {
        format!("{}", q.round() as i64)
    } else {
        format!("{q:.2}")
    }
}

// ---------------------------------------------------------------------------
// ABC classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AbcEntry {
    pub product_id: String,
    pub name: String,
    pub value: f64,
    /// Share of total value held by this product.
    pub value_pct: f64,
    /// Share of total value up to and including this product.
    pub cumulative_pct: f64,
    /// 1-based position in the value ranking.
    pub rank: usize,
    pub class: AbcClass,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AbcClassTotals {
    pub count: usize,
    pub value: f64,
    pub value_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AbcReport {
    pub entries: Vec<AbcEntry>,
    pub total_value: f64,
    pub a: AbcClassTotals,
    pub b: AbcClassTotals,
    pub c: AbcClassTotals,
}

impl AbcReport {
    pub fn class_of(&self, product_id: &str) -> Option<AbcClass> {
        self.entries
            .iter()
            .find(|e| e.product_id == product_id)
            .map(|e| e.class)
    }

    pub fn totals(&self, class: AbcClass) -> &AbcClassTotals {
        match class {
            AbcClass::A => &self.a,
            AbcClass::B => &self.b,
            AbcClass::C => &self.c,
        }
    }
}

/// Pareto classification by stock value at cost.
///
/// Products are ranked by `stock * precio_costo` (descending, ties keep
/// input order). A product is A while the value accumulated *before* it is
/// under 80% of the total or it sits in the first 20% of the ranking; B
/// under 95% or within the first 50%; C otherwise. Products without value
/// are always C, and so is everything when the total value is zero.
pub fn classify_abc(products: &[Product]) -> AbcReport {
    let n = products.len();
    if n == 0 {
        return AbcReport::default();
    }

    let mut ranked: Vec<(usize, f64)> = products
        .iter()
        .enumerate()
        .map(|(i, p)| (i, p.inventory_value()))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let total: f64 = ranked.iter().map(|(_, v)| *v).sum();
    let mut report = AbcReport {
        entries: Vec::with_capacity(n),
        total_value: round2(total),
        ..AbcReport::default()
    };

    let mut accumulated = 0.0;
    for (pos, (idx, value)) in ranked.into_iter().enumerate() {
        let product = &products[idx];
        let before_pct = percent_of(accumulated, total);
        let rank_pct = (pos + 1) as f64 / n as f64 * 100.0;
        accumulated += value;

        let class = if total <= 0.0 || value <= 0.0 {
            AbcClass::C
        } else if before_pct < CLASS_A_VALUE_PCT || rank_pct <= CLASS_A_COUNT_PCT {
            AbcClass::A
        } else if before_pct < CLASS_B_VALUE_PCT || rank_pct <= CLASS_B_COUNT_PCT {
            AbcClass::B
        } else {
            AbcClass::C
        };

        let bucket = match class {
            AbcClass::A => &mut report.a,
            AbcClass::B => &mut report.b,
            AbcClass::C => &mut report.c,
        };
        bucket.count += 1;
        bucket.value += value;

        report.entries.push(AbcEntry {
            product_id: product.id.clone(),
            name: product.name.clone(),
            value: round2(value),
            value_pct: round2(percent_of(value, total)),
            cumulative_pct: round2(percent_of(accumulated, total)),
            rank: pos + 1,
            class,
        });
    }

    for bucket in [&mut report.a, &mut report.b, &mut report.c] {
        bucket.value_pct = round2(percent_of(bucket.value, total));
        bucket.value = round2(bucket.value);
    }

    report
}

// ---------------------------------------------------------------------------
// Urgency and stock status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Critica,
    Alta,
    Media,
    Baja,
    Ninguna,
}

impl UrgencyLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => Self::Critica,
            60..=89 => Self::Alta,
            40..=59 => Self::Media,
            1..=39 => Self::Baja,
            0 => Self::Ninguna,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Critica => "Crítica",
            Self::Alta => "Alta",
            Self::Media => "Media",
            Self::Baja => "Baja",
            Self::Ninguna => "Ninguna",
        }
    }
}

/// Restock urgency from 0 (none) to 100 (out of stock).
pub fn urgency_score(stock: f64, min_stock: f64) -> u8 {
    if stock <= 0.0 {
        return 100;
    }
    if min_stock <= 0.0 {
        return 0;
    }
    let ratio = stock / min_stock;
    if ratio <= 0.25 {
        90
    } else if ratio <= 0.5 {
        75
    } else if ratio <= 1.0 {
        60
    } else if ratio <= 1.5 {
        40
    } else if ratio <= 2.0 {
        20
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    SinStock,
    Critico,
    Bajo,
    Normal,
    Exceso,
}

impl StockStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SinStock => "Sin stock",
            Self::Critico => "Crítico",
            Self::Bajo => "Bajo",
            Self::Normal => "Normal",
            Self::Exceso => "Exceso",
        }
    }
}

pub fn stock_status(product: &Product) -> StockStatus {
    let stock = product.stock;
    let min = product.min_stock;
    if stock <= 0.0 {
        return StockStatus::SinStock;
    }
    if min > 0.0 && stock <= min * 0.5 {
        return StockStatus::Critico;
    }
    if min > 0.0 && stock <= min {
        return StockStatus::Bajo;
    }
    if let Some(max) = product.max_stock.filter(|m| *m > 0.0) {
        if stock > max {
            return StockStatus::Exceso;
        }
    }
    StockStatus::Normal
}

#[derive(Debug, Clone, Serialize)]
pub struct StockAlert {
    pub product_id: String,
    pub name: String,
    pub status: StockStatus,
    pub stock: f64,
    pub min_stock: f64,
    pub urgency: u8,
}

/// Every product whose status is not normal, most urgent first.
pub fn stock_alerts(products: &[Product]) -> Vec<StockAlert> {
    let mut alerts: Vec<StockAlert> = products
        .iter()
        .filter_map(|p| {
            let status = stock_status(p);
            (status != StockStatus::Normal).then(|| StockAlert {
                product_id: p.id.clone(),
                name: p.name.clone(),
                status,
                stock: p.stock,
                min_stock: p.min_stock,
                urgency: urgency_score(p.stock, p.min_stock),
            })
        })
        .collect();
    alerts.sort_by(|a, b| b.urgency.cmp(&a.urgency).then(a.status.cmp(&b.status)));
    alerts
}

// ---------------------------------------------------------------------------
// Reorder suggestions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReorderSuggestion {
    pub product_id: String,
    pub name: String,
    pub stock: f64,
    pub min_stock: f64,
    pub target_stock: f64,
    pub suggested_qty: f64,
    pub urgency: u8,
    pub level: UrgencyLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_of_cover: Option<f64>,
    pub estimated_cost: f64,
    pub abc_class: AbcClass,
}

/// Level a reorder should bring the product up to.
pub fn target_stock(product: &Product, cover_days: u32) -> f64 {
    if let Some(max) = product.max_stock.filter(|m| *m > 0.0) {
        return max;
    }
    let by_velocity = product.daily_velocity() * f64::from(cover_days);
    (product.min_stock * 2.0).max(by_velocity)
}

/// Purchase suggestions for every product with a non-zero urgency.
///
/// Sorted by urgency, then ABC class (A first), then estimated cost.
pub fn suggest_reorders(
    products: &[Product],
    abc: &AbcReport,
    cover_days: u32,
) -> Vec<ReorderSuggestion> {
    let mut suggestions: Vec<ReorderSuggestion> = products
        .iter()
        .filter_map(|p| {
            let urgency = urgency_score(p.stock, p.min_stock);
            if urgency == 0 {
                return None;
            }
            let target = target_stock(p, cover_days);
            let qty = (target - p.stock.max(0.0)).ceil().max(0.0);
            if qty <= 0.0 {
                return None;
            }
            let velocity = p.daily_velocity();
            let days_of_cover = (velocity > 0.0).then(|| round2(p.stock.max(0.0) / velocity));
            Some(ReorderSuggestion {
                product_id: p.id.clone(),
                name: p.name.clone(),
                stock: p.stock,
                min_stock: p.min_stock,
                target_stock: round2(target),
                suggested_qty: qty,
                urgency,
                level: UrgencyLevel::from_score(urgency),
                days_of_cover,
                estimated_cost: round2(qty * p.cost_price.max(0.0)),
                abc_class: abc
                    .class_of(&p.id)
                    .or(p.abc_class)
                    .unwrap_or_default(),
            })
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.urgency
            .cmp(&a.urgency)
            .then(a.abc_class.cmp(&b.abc_class))
            .then(
                b.estimated_cost
                    .partial_cmp(&a.estimated_cost)
                    .unwrap_or(Ordering::Equal),
            )
    });
    suggestions
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct InventorySummary {
    pub products: usize,
    pub units: f64,
    pub cost_value: f64,
    pub retail_value: f64,
    pub potential_margin: f64,
    pub margin_pct: f64,
    pub out_of_stock: usize,
    pub critical: usize,
    pub low: usize,
    pub normal: usize,
    pub excess: usize,
    pub class_a: usize,
    pub class_b: usize,
    pub class_c: usize,
}

pub fn summarize(products: &[Product], abc: &AbcReport) -> InventorySummary {
    let mut summary = InventorySummary {
        products: products.len(),
        class_a: abc.a.count,
        class_b: abc.b.count,
        class_c: abc.c.count,
        ..InventorySummary::default()
    };
    for p in products {
        summary.units += p.stock.max(0.0);
        summary.cost_value += p.inventory_value();
        summary.retail_value += p.retail_value();
        match stock_status(p) {
            StockStatus::SinStock => summary.out_of_stock += 1,
            StockStatus::Critico => summary.critical += 1,
            StockStatus::Bajo => summary.low += 1,
            StockStatus::Normal => summary.normal += 1,
            StockStatus::Exceso => summary.excess += 1,
        }
    }
    summary.potential_margin = round2(summary.retail_value - summary.cost_value);
    summary.margin_pct = round2(percent_of(summary.potential_margin, summary.retail_value));
    summary.cost_value = round2(summary.cost_value);
    summary.retail_value = round2(summary.retail_value);
    summary
}

/// Case-insensitive match on name or code, optionally restricted to a
/// category.
pub fn filter_products<'a>(
    products: &'a [Product],
    query: Option<&str>,
    category: Option<&str>,
) -> Vec<&'a Product> {
    let needle = query.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty());
    let category = category.map(|c| c.trim().to_lowercase()).filter(|c| !c.is_empty());
    products
        .iter()
        .filter(|p| match &needle {
            Some(n) => {
                p.name.to_lowercase().contains(n)
                    || p.code.as_deref().map(|c| c.to_lowercase().contains(n)).unwrap_or(false)
            }
            None => true,
        })
        .filter(|p| match &category {
            Some(c) => p.category.as_deref().map(|pc| pc.to_lowercase() == *c).unwrap_or(false),
            None => true,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

/// Parse a products response (bare array or wrapped).
pub fn parse_products(payload: &Value) -> Vec<Product> {
    parse_rows(extract_array(payload, &["productos", "items", "inventario"]), "producto")
}

/// Load the product list, falling back to the plain products endpoint when
/// the smart inventory endpoint is unavailable.
pub async fn fetch_products(api: &ApiClient) -> Result<Vec<Product>, ApiError> {
    let payload = api
        .get_with_fallback(endpoints::SMART_INVENTORY, endpoints::PRODUCTS, &[])
        .await?;
    let products = parse_products(&payload);
    info!(count = products.len(), "products loaded");
    Ok(products)
}
