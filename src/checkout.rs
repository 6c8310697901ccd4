//! Point-of-sale checkout: cart, discounts, payment settlement and the
//! sale payload sent to `procesar_venta.php`.
//!
//! Amounts are clamped at every step so neither a line nor the sale can
//! end up negative, whatever combination of discounts is applied.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::{endpoints, ApiClient, ApiError};
use crate::data_helpers::json_to_f64;
use crate::inventory::Product;
use crate::money::{self, round2};
use crate::sales::PaymentMethod;

// ---------------------------------------------------------------------------
// Discounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "tipo", content = "valor", rename_all = "lowercase")]
pub enum Discount {
    #[default]
    Ninguno,
    Porcentaje(f64),
    Monto(f64),
}

impl Discount {
    /// Discount in money over `base`, always within `0..=base`.
    pub fn amount_on(&self, base: f64) -> f64 {
        let base = base.max(0.0);
        let raw = match *self {
            Discount::Ninguno => 0.0,
            Discount::Porcentaje(pct) => base * clamp_finite(pct, 0.0, 100.0) / 100.0,
            Discount::Monto(amount) => clamp_finite(amount, 0.0, f64::MAX),
        };
        round2(raw.min(base))
    }

    /// Parse `10%` or `500` (amount).
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Discount::Ninguno);
        }
        if let Some(pct) = trimmed.strip_suffix('%') {
            let value = pct
                .trim()
                .replace(',', ".")
                .parse::<f64>()
                .map_err(|_| format!("Porcentaje de descuento inválido: {raw}"))?;
            return Ok(Discount::Porcentaje(value));
        }
        money::parse_ars(trimmed)
            .map(Discount::Monto)
            .ok_or_else(|| format!("Descuento inválido: {raw}"))
    }
}

fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    }
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub code: Option<String>,
    pub unit_price: f64,
    pub unit_cost: f64,
    pub quantity: f64,
    /// Units that may be sold, when the backend reported a limit.
    pub stock_limit: Option<f64>,
    pub discount: Discount,
}

impl CartLine {
    pub fn gross(&self) -> f64 {
        round2(self.unit_price * self.quantity)
    }

    pub fn discount_amount(&self) -> f64 {
        self.discount.amount_on(self.gross())
    }

    pub fn total(&self) -> f64 {
        round2(self.gross() - self.discount_amount()).max(0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Cart {
    pub lines: Vec<CartLine>,
    pub discount: Discount,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn line_mut(&mut self, product_id: &str) -> Option<&mut CartLine> {
        self.lines.iter_mut().find(|l| l.product_id == product_id)
    }

    /// Add `quantity` units of `product`, merging with an existing line.
    pub fn add_product(&mut self, product: &Product, quantity: f64) -> Result<(), String> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err("La cantidad debe ser mayor a cero".into());
        }
        if product.sale_price <= 0.0 {
            return Err(format!("{} no tiene precio de venta", product.name));
        }
        let in_cart = self
            .lines
            .iter()
            .find(|l| l.product_id == product.id)
            .map(|l| l.quantity)
            .unwrap_or(0.0);
        product.check_sellable(in_cart + quantity)?;

        if let Some(line) = self.line_mut(&product.id) {
            line.quantity += quantity;
            return Ok(());
        }
        self.lines.push(CartLine {
            product_id: product.id.clone(),
            name: product.name.clone(),
            code: product.code.clone(),
            unit_price: product.sale_price,
            unit_cost: product.cost_price,
            quantity,
            stock_limit: Some(product.available_stock()),
            discount: Discount::Ninguno,
        });
        Ok(())
    }

    /// Set a line's quantity; zero removes the line.
    pub fn set_quantity(&mut self, product_id: &str, quantity: f64) -> Result<(), String> {
        if !quantity.is_finite() || quantity < 0.0 {
            return Err("La cantidad no puede ser negativa".into());
        }
        if quantity == 0.0 {
            self.remove(product_id);
            return Ok(());
        }
        let line = self
            .line_mut(product_id)
            .ok_or_else(|| "El producto no está en el carrito".to_string())?;
        if let Some(limit) = line.stock_limit {
            if quantity > limit + f64::EPSILON {
                return Err(format!(
                    "Stock insuficiente para {}: disponible {}",
                    line.name,
                    crate::inventory::fmt_qty(limit)
                ));
            }
        }
        line.quantity = quantity;
        Ok(())
    }

    pub fn remove(&mut self, product_id: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);
        self.lines.len() != before
    }

    pub fn set_line_discount(&mut self, product_id: &str, discount: Discount) -> Result<(), String> {
        let line = self
            .line_mut(product_id)
            .ok_or_else(|| "El producto no está en el carrito".to_string())?;
        line.discount = discount;
        Ok(())
    }

    pub fn set_discount(&mut self, discount: Discount) {
        self.discount = discount;
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.discount = Discount::Ninguno;
    }

    pub fn item_count(&self) -> f64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Sum of line prices before any discount.
    pub fn gross(&self) -> f64 {
        round2(self.lines.iter().map(CartLine::gross).sum())
    }

    /// Sum of line totals after line discounts.
    pub fn subtotal(&self) -> f64 {
        round2(self.lines.iter().map(CartLine::total).sum())
    }

    pub fn global_discount_amount(&self) -> f64 {
        self.discount.amount_on(self.subtotal())
    }

    /// Line and global discounts together.
    pub fn total_discount(&self) -> f64 {
        round2(self.gross() - self.total())
    }

    pub fn total(&self) -> f64 {
        round2(self.subtotal() - self.global_discount_amount()).max(0.0)
    }

    /// Overall discount as a percentage of the undiscounted price.
    pub fn discount_pct(&self) -> f64 {
        round2(money::percent_of(self.total_discount(), self.gross()))
    }

    pub fn cost(&self) -> f64 {
        round2(self.lines.iter().map(|l| l.unit_cost * l.quantity).sum())
    }
}

// ---------------------------------------------------------------------------
// Supervisor authorization
// ---------------------------------------------------------------------------

/// Something able to vouch for a discount above the cashier's limit.
pub trait DiscountAuthorizer {
    fn authorize(&self, pin: &str) -> Result<(), String>;
}

pub fn requires_authorization(cart: &Cart, max_discount_pct: f64) -> bool {
    cart.discount_pct() > max_discount_pct + money::EPSILON
}

/// Returns `true` when a supervisor had to authorize the discount.
pub fn authorize_discount(
    cart: &Cart,
    max_discount_pct: f64,
    authorizer: &dyn DiscountAuthorizer,
    pin: Option<&str>,
) -> Result<bool, String> {
    if !requires_authorization(cart, max_discount_pct) {
        return Ok(false);
    }
    let pin = pin.filter(|p| !p.trim().is_empty()).ok_or_else(|| {
        format!(
            "El descuento ({:.2}%) supera el máximo permitido ({:.2}%). Requiere PIN de supervisor.",
            cart.discount_pct(),
            max_discount_pct
        )
    })?;
    authorizer.authorize(pin)?;
    info!(discount_pct = cart.discount_pct(), "discount authorized by supervisor");
    Ok(true)
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub total: f64,
    pub payments: Vec<Payment>,
    /// Cash handed over by the customer, when paying cash.
    pub received: Option<f64>,
    pub change: f64,
}

impl Settlement {
    pub fn method_label(&self) -> &'static str {
        match self.payments.as_slice() {
            [single] => single.method.as_str(),
            _ => "mixto",
        }
    }
}

/// Settle `total` with one payment method. Cash needs `received`.
pub fn settle_single(
    method: PaymentMethod,
    total: f64,
    received: Option<f64>,
) -> Result<Settlement, String> {
    let total = round2(total.max(0.0));
    if method != PaymentMethod::Efectivo {
        return Ok(Settlement {
            total,
            payments: vec![Payment {
                method,
                amount: total,
            }],
            received: None,
            change: 0.0,
        });
    }
    let received = received.unwrap_or(total);
    if !received.is_finite() || received + money::EPSILON < total {
        return Err(format!(
            "El monto recibido ({}) es menor al total ({})",
            money::format_ars(received),
            money::format_ars(total)
        ));
    }
    Ok(Settlement {
        total,
        payments: vec![Payment {
            method,
            amount: total,
        }],
        received: Some(round2(received)),
        change: round2(received - total).max(0.0),
    })
}

/// Settle `total` across several methods. Only cash may exceed its share;
/// the excess is returned as change.
pub fn settle_split(total: f64, payments: &[Payment]) -> Result<Settlement, String> {
    let total = round2(total.max(0.0));
    if payments.is_empty() {
        return Err("Indique al menos un medio de pago".into());
    }
    if payments.iter().any(|p| !p.amount.is_finite() || p.amount <= 0.0) {
        return Err("Cada pago debe tener un monto mayor a cero".into());
    }
    let paid = round2(payments.iter().map(|p| p.amount).sum());
    if paid + money::EPSILON < total {
        return Err(format!(
            "Los pagos ({}) no cubren el total ({}). Faltan {}",
            money::format_ars(paid),
            money::format_ars(total),
            money::format_ars(total - paid)
        ));
    }

    let cash: f64 = payments
        .iter()
        .filter(|p| p.method == PaymentMethod::Efectivo)
        .map(|p| p.amount)
        .sum();
    let excess = round2(paid - total);
    if excess > cash + money::EPSILON {
        return Err("Solo los pagos en efectivo pueden superar el total".into());
    }

    // Cash lines shrink by the change so amounts add up to the total.
    let mut remaining_change = excess;
    let mut settled = Vec::with_capacity(payments.len());
    for p in payments {
        let mut amount = p.amount;
        if p.method == PaymentMethod::Efectivo && remaining_change > 0.0 {
            let taken = remaining_change.min(amount);
            amount -= taken;
            remaining_change -= taken;
        }
        if amount > 0.0 {
            settled.push(Payment {
                method: p.method,
                amount: round2(amount),
            });
        }
    }

    Ok(Settlement {
        total,
        payments: settled,
        received: (cash > 0.0).then(|| round2(cash)),
        change: excess,
    })
}

// ---------------------------------------------------------------------------
// Sale submission
// ---------------------------------------------------------------------------

/// JSON body for `procesar_venta.php`.
pub fn sale_payload(
    cart: &Cart,
    settlement: &Settlement,
    user_id: Option<&str>,
    supervisor_authorized: bool,
) -> Result<Value, String> {
    if cart.is_empty() {
        return Err("El carrito está vacío".into());
    }
    if !money::approx_eq(cart.total(), settlement.total) {
        return Err("El total cambió después de registrar el pago. Vuelva a cobrar.".into());
    }
    let items: Vec<Value> = cart
        .lines
        .iter()
        .map(|l| {
            json!({
                "producto_id": l.product_id,
                "nombre": l.name,
                "cantidad": l.quantity,
                "precio_unitario": l.unit_price,
                "descuento": l.discount_amount(),
                "subtotal": l.total(),
            })
        })
        .collect();
    let pagos: Vec<Value> = settlement
        .payments
        .iter()
        .map(|p| json!({ "metodo": p.method.as_str(), "monto": p.amount }))
        .collect();

    Ok(json!({
        "items": items,
        "subtotal": cart.subtotal(),
        "descuento": cart.total_discount(),
        "total": cart.total(),
        "metodo_pago": settlement.method_label(),
        "pagos": pagos,
        "monto_recibido": settlement.received,
        "vuelto": settlement.change,
        "usuario_id": user_id,
        "descuento_autorizado": supervisor_authorized,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedSale {
    pub sale_id: String,
    pub total: f64,
    pub message: Option<String>,
}

pub fn parse_submit_response(payload: &Value) -> Result<SubmittedSale, String> {
    let sale_id = ["venta_id", "id_venta", "id"]
        .iter()
        .find_map(|k| {
            payload.get(*k).and_then(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        })
        .ok_or_else(|| "El servidor no devolvió el número de venta".to_string())?;
    Ok(SubmittedSale {
        sale_id,
        total: payload.get("total").and_then(json_to_f64).unwrap_or(0.0),
        message: payload
            .get("message")
            .or_else(|| payload.get("mensaje"))
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

pub async fn submit_sale(api: &ApiClient, payload: &Value) -> Result<SubmittedSale, ApiError> {
    let response = api.post(endpoints::PROCESS_SALE, payload).await?;
    let submitted = parse_submit_response(&response).map_err(ApiError::Invalid)?;
    if submitted.total > 0.0 {
        if let Some(sent) = payload.get("total").and_then(json_to_f64) {
            if !money::approx_eq(sent, submitted.total) {
                warn!(sent, recorded = submitted.total, "backend recorded a different total");
            }
        }
    }
    info!(sale_id = %submitted.sale_id, "sale submitted");
    Ok(submitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::StockInfo;

    fn product(id: &str, price: f64, stock: f64) -> Product {
        Product {
            id: id.into(),
            name: format!("Producto {id}"),
            stock,
            cost_price: price * 0.6,
            sale_price: price,
            ..Default::default()
        }
    }

    struct FixedPin(&'static str);

    impl DiscountAuthorizer for FixedPin {
        fn authorize(&self, pin: &str) -> Result<(), String> {
            if pin == self.0 {
                Ok(())
            } else {
                Err("PIN incorrecto".into())
            }
        }
    }

    #[test]
    fn adding_merges_and_respects_stock() {
        let mut cart = Cart::new();
        let coca = product("1", 1200.0, 5.0);
        cart.add_product(&coca, 2.0).expect("add");
        cart.add_product(&coca, 3.0).expect("merge");
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].quantity, 5.0);
        assert!(cart.add_product(&coca, 1.0).is_err());
        assert!(cart.add_product(&coca, 0.0).is_err());

        let mut blocked = product("2", 500.0, 10.0);
        blocked.stock_info = Some(StockInfo {
            puede_vender: false,
            stock_disponible: None,
            mensaje: Some("Producto discontinuado".into()),
        });
        assert!(cart.add_product(&blocked, 1.0).is_err());
    }

    #[test]
    fn quantities_and_removal() {
        let mut cart = Cart::new();
        cart.add_product(&product("1", 100.0, 4.0), 1.0).expect("add");
        assert!(cart.set_quantity("1", 5.0).is_err());
        cart.set_quantity("1", 4.0).expect("within stock");
        assert_eq!(cart.total(), 400.0);
        cart.set_quantity("1", 0.0).expect("remove");
        assert!(cart.is_empty());
        assert!(cart.set_quantity("1", 1.0).is_err());
    }

    #[test]
    fn discounts_stack_and_clamp() {
        let mut cart = Cart::new();
        cart.add_product(&product("1", 1000.0, 10.0), 2.0).expect("add");
        cart.add_product(&product("2", 500.0, 10.0), 1.0).expect("add");
        assert_eq!(cart.gross(), 2500.0);

        cart.set_line_discount("1", Discount::Porcentaje(10.0)).expect("line discount");
        assert_eq!(cart.subtotal(), 2300.0);
        cart.set_discount(Discount::Monto(300.0));
        assert_eq!(cart.total(), 2000.0);
        assert_eq!(cart.total_discount(), 500.0);
        assert_eq!(cart.discount_pct(), 20.0);

        cart.set_discount(Discount::Porcentaje(250.0));
        assert_eq!(cart.total(), 0.0);
        cart.set_discount(Discount::Monto(1_000_000.0));
        assert_eq!(cart.total(), 0.0);
        cart.set_discount(Discount::Porcentaje(-20.0));
        assert_eq!(cart.total(), 2300.0);
        cart.set_discount(Discount::Monto(f64::NAN));
        assert_eq!(cart.total(), 2300.0);
    }

    #[test]
    fn total_is_never_negative() {
        let discounts = [
            Discount::Ninguno,
            Discount::Porcentaje(0.0),
            Discount::Porcentaje(55.5),
            Discount::Porcentaje(100.0),
            Discount::Porcentaje(1e9),
            Discount::Monto(0.01),
            Discount::Monto(999.99),
            Discount::Monto(1e12),
            Discount::Monto(-50.0),
        ];
        for line in discounts {
            for global in discounts {
                let mut cart = Cart::new();
                cart.add_product(&product("1", 333.33, 100.0), 3.0).expect("add");
                cart.set_line_discount("1", line).expect("line");
                cart.set_discount(global);
                assert!(cart.total() >= 0.0, "{line:?} + {global:?}");
                assert!(cart.total() <= cart.gross());
            }
        }
    }

    #[test]
    fn discount_parsing() {
        assert_eq!(Discount::parse("15%"), Ok(Discount::Porcentaje(15.0)));
        assert_eq!(Discount::parse("7,5 %"), Ok(Discount::Porcentaje(7.5)));
        assert_eq!(Discount::parse("$ 1.500"), Ok(Discount::Monto(1500.0)));
        assert_eq!(Discount::parse(""), Ok(Discount::Ninguno));
        assert!(Discount::parse("mucho").is_err());
    }

    #[test]
    fn supervisor_authorization_above_limit() {
        let mut cart = Cart::new();
        cart.add_product(&product("1", 1000.0, 10.0), 1.0).expect("add");
        cart.set_discount(Discount::Porcentaje(10.0));
        let pin = FixedPin("4321");
        assert_eq!(authorize_discount(&cart, 15.0, &pin, None), Ok(false));

        cart.set_discount(Discount::Porcentaje(30.0));
        assert!(authorize_discount(&cart, 15.0, &pin, None).is_err());
        assert!(authorize_discount(&cart, 15.0, &pin, Some("0000")).is_err());
        assert_eq!(authorize_discount(&cart, 15.0, &pin, Some("4321")), Ok(true));
    }

    #[test]
    fn cash_change_and_card_exact() {
        let s = settle_single(PaymentMethod::Efectivo, 2750.0, Some(5000.0)).expect("cash");
        assert_eq!(s.change, 2250.0);
        assert!(settle_single(PaymentMethod::Efectivo, 2750.0, Some(2000.0)).is_err());

        let s = settle_single(PaymentMethod::Tarjeta, 2750.0, Some(9999.0)).expect("card");
        assert_eq!(s.change, 0.0);
        assert_eq!(s.payments[0].amount, 2750.0);
        assert_eq!(s.received, None);
    }

    #[test]
    fn split_payments_cover_total() {
        let payments = [
            Payment { method: PaymentMethod::Tarjeta, amount: 3000.0 },
            Payment { method: PaymentMethod::Efectivo, amount: 2500.0 },
        ];
        let s = settle_split(5000.0, &payments).expect("split");
        assert_eq!(s.change, 500.0);
        assert_eq!(s.payments[1].amount, 2000.0);
        let settled: f64 = s.payments.iter().map(|p| p.amount).sum();
        assert_eq!(settled, 5000.0);
        assert_eq!(s.method_label(), "mixto");

        assert!(settle_split(5000.0, &payments[..1]).is_err());
        let over_card = [
            Payment { method: PaymentMethod::Tarjeta, amount: 6000.0 },
        ];
        assert!(settle_split(5000.0, &over_card).is_err());
        assert!(settle_split(5000.0, &[]).is_err());
    }

    #[test]
    fn payload_matches_cart() {
        let mut cart = Cart::new();
        assert!(sale_payload(&cart, &settle_single(PaymentMethod::Qr, 0.0, None).expect("s"), None, false).is_err());

        cart.add_product(&product("9", 800.0, 10.0), 2.0).expect("add");
        cart.set_discount(Discount::Monto(100.0));
        let settlement = settle_single(PaymentMethod::Efectivo, cart.total(), Some(2000.0)).expect("cash");
        let payload = sale_payload(&cart, &settlement, Some("12"), false).expect("payload");
        assert_eq!(payload["total"], json!(1500.0));
        assert_eq!(payload["descuento"], json!(100.0));
        assert_eq!(payload["metodo_pago"], "efectivo");
        assert_eq!(payload["vuelto"], json!(500.0));
        assert_eq!(payload["items"][0]["producto_id"], "9");

        let stale = settle_single(PaymentMethod::Efectivo, 1600.0, Some(2000.0)).expect("cash");
        assert!(sale_payload(&cart, &stale, None, false).is_err());
    }

    #[test]
    fn submit_response_ids() {
        let ok = parse_submit_response(&json!({ "venta_id": 481, "total": "1500.00" })).expect("id");
        assert_eq!(ok.sale_id, "481");
        assert_eq!(ok.total, 1500.0);
        assert!(parse_submit_response(&json!({ "ok": true })).is_err());
    }

    #[tokio::test]
    async fn submit_with_expired_session_is_auth_failure() {
        let base = crate::api::test_backend::serve(401, "");
        let api = ApiClient::new(&base, std::time::Duration::from_secs(5)).expect("client");
        let err = submit_sale(&api, &json!({ "total": 100.0 }))
            .await
            .expect_err("expired session");
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn submit_without_sale_id_is_invalid() {
        let base = crate::api::test_backend::serve(200, r#"{"success":true,"data":{"ok":1}}"#);
        let api = ApiClient::new(&base, std::time::Duration::from_secs(5)).expect("client");
        let err = submit_sale(&api, &json!({ "total": 100.0 }))
            .await
            .expect_err("no id");
        assert!(matches!(err, ApiError::Invalid(_)));
        assert!(!err.is_auth_failure());
    }
}
