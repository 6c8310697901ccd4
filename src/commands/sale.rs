use anyhow::{bail, Context as _};
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

use super::{api_result, emit, fail, LAST_TICKET_KEY};
use crate::auth::SupervisorPin;
use crate::checkout::{self, Cart, Discount, Payment};
use crate::cli::{TicketFormat, VenderArgs};
use crate::data_helpers::{read_local_json, write_local_json};
use crate::inventory::{self, Product};
use crate::money::{self, format_ars};
use crate::receipt_renderer::{self, LayoutConfig, PaperWidth, ReceiptDocument, SaleTicketDoc};
use crate::sales::PaymentMethod;
use crate::{settings, AppContext};

/// `7790001x2` → (`7790001`, 2). A bare code means one unit.
fn parse_item(raw: &str) -> anyhow::Result<(&str, f64)> {
    let raw = raw.trim();
    if let Some((code, qty)) = raw.rsplit_once(['x', 'X', '*']) {
        if let Ok(qty) = qty.trim().replace(',', ".").parse::<f64>() {
            if !code.trim().is_empty() {
                return Ok((code.trim(), qty));
            }
        }
    }
    if raw.is_empty() {
        bail!("Ítem vacío");
    }
    Ok((raw, 1.0))
}

fn parse_method(raw: &str) -> anyhow::Result<PaymentMethod> {
    let method = PaymentMethod::from_value(raw);
    if method == PaymentMethod::Otro && raw.trim().to_lowercase() != "otro" {
        bail!("Medio de pago desconocido: {raw}");
    }
    Ok(method)
}

/// `tarjeta:5000` → payment.
fn parse_split(raw: &str) -> anyhow::Result<Payment> {
    let (method, amount) = raw
        .split_once(':')
        .with_context(|| format!("Pago inválido: {raw} (use metodo:monto)"))?;
    let amount =
        money::parse_ars(amount).with_context(|| format!("Monto inválido en el pago: {raw}"))?;
    Ok(Payment {
        method: parse_method(method)?,
        amount,
    })
}

fn find_product<'a>(products: &'a [Product], key: &str) -> anyhow::Result<&'a Product> {
    products
        .iter()
        .find(|p| p.code.as_deref() == Some(key))
        .or_else(|| products.iter().find(|p| p.id == key))
        .with_context(|| format!("Producto no encontrado: {key}"))
}

fn build_cart(products: &[Product], items: &[String]) -> anyhow::Result<Cart> {
    let mut cart = Cart::new();
    for raw in items {
        let (key, qty) = parse_item(raw)?;
        let product = find_product(products, key)?;
        cart.add_product(product, qty).map_err(fail)?;
    }
    Ok(cart)
}

pub async fn vender(ctx: &AppContext, json: bool, args: VenderArgs) -> anyhow::Result<()> {
    let session = ctx.session().map_err(fail)?;
    session.require("vender").map_err(fail)?;

    let products = api_result(ctx, inventory::fetch_products(&ctx.api).await)?;
    let mut cart = build_cart(&products, &args.items)?;

    let mut supervisor_authorized = false;
    if let Some(raw) = args.descuento.as_deref() {
        session.require("aplicar_descuento").map_err(fail)?;
        cart.set_discount(Discount::parse(raw).map_err(fail)?);
        let max_pct = settings::load_local(&ctx.db).max_discount_pct;
        supervisor_authorized = if session.has_permission("autorizar_descuento") {
            checkout::requires_authorization(&cart, max_pct)
        } else {
            let pin = SupervisorPin::new(&ctx.db);
            checkout::authorize_discount(&cart, max_pct, &pin, args.pin.as_deref()).map_err(fail)?
        };
    }

    let total = cart.total();
    let settled = if args.split.is_empty() {
        checkout::settle_single(parse_method(&args.pago)?, total, args.recibido)
    } else {
        let payments = args
            .split
            .iter()
            .map(|raw| parse_split(raw))
            .collect::<anyhow::Result<Vec<_>>>()?;
        checkout::settle_split(total, &payments)
    };
    let settlement = settled.map_err(fail)?;

    let payload = checkout::sale_payload(
        &cart,
        &settlement,
        Some(session.user_id.as_str()),
        supervisor_authorized,
    )
    .map_err(fail)?;
    let submitted = api_result(ctx, checkout::submit_sale(&ctx.api, &payload).await)?;
    info!(sale_id = %submitted.sale_id, total, "sale recorded");

    let doc = SaleTicketDoc::from_checkout(
        &cart,
        &settlement,
        &submitted.sale_id,
        Some(session.name.as_str()),
        chrono::Local::now().naive_local(),
    );
    let stored = serde_json::to_value(ReceiptDocument::SaleTicket(doc))?;
    write_local_json(&ctx.db, LAST_TICKET_KEY, &stored).map_err(fail)?;

    emit(
        json,
        &json!({ "venta": submitted, "cobro": settlement, "carrito": cart }),
        |_| {
            let mut out = vec![format!(
                "Venta {} registrada: {}",
                submitted.sale_id,
                format_ars(settlement.total)
            )];
            if settlement.change > 0.0 {
                out.push(format!("Vuelto: {}", format_ars(settlement.change)));
            }
            if let Some(message) = &submitted.message {
                out.push(message.clone());
            }
            out.push("Imprima el ticket con `tayrona ticket`.".to_string());
            out.join("\n")
        },
    )
}

fn last_ticket(stored: Value) -> anyhow::Result<ReceiptDocument> {
    if stored.is_null() {
        bail!("No hay ticket para imprimir");
    }
    serde_json::from_value(stored).context("El último ticket guardado es ilegible")
}

pub fn ticket(
    ctx: &AppContext,
    formato: TicketFormat,
    salida: Option<&Path>,
    ancho: Option<u32>,
) -> anyhow::Result<()> {
    let document = last_ticket(read_local_json(&ctx.db, LAST_TICKET_KEY).map_err(fail)?)?;
    let mut layout = LayoutConfig::from(&settings::load_local(&ctx.db));
    if let Some(mm) = ancho {
        layout.paper_width = PaperWidth::from_mm(mm);
    }
    let rendered = match formato {
        TicketFormat::Texto => receipt_renderer::render_text(&document, &layout),
        TicketFormat::Html => receipt_renderer::render_html(&document, &layout),
    };
    match salida {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("No se pudo escribir {}", path.display()))?;
            eprintln!("Ticket guardado en {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, code: &str, price: f64, stock: f64) -> Product {
        Product {
            id: id.into(),
            name: format!("Producto {id}"),
            code: Some(code.into()),
            stock,
            sale_price: price,
            ..Default::default()
        }
    }

    #[test]
    fn items_with_and_without_quantity() {
        assert_eq!(parse_item("7790001x2").unwrap(), ("7790001", 2.0));
        assert_eq!(parse_item("7790001*1,5").unwrap(), ("7790001", 1.5));
        assert_eq!(parse_item(" 12 ").unwrap(), ("12", 1.0));
        assert_eq!(parse_item("box").unwrap(), ("box", 1.0));
        assert!(parse_item("  ").is_err());
    }

    #[test]
    fn split_payments_parse() {
        let p = parse_split("tarjeta:5.000").unwrap();
        assert_eq!(p.method, PaymentMethod::Tarjeta);
        assert_eq!(p.amount, 5000.0);
        assert!(parse_split("tarjeta").is_err());
        assert!(parse_split("cheque:100").is_err());
        assert_eq!(parse_method("otro").unwrap(), PaymentMethod::Otro);
    }

    #[test]
    fn cart_matches_code_then_id() {
        let products = vec![product("1", "779", 100.0, 10.0), product("2", "1", 50.0, 10.0)];
        let cart = build_cart(&products, &["779x2".into(), "2".into()]).unwrap();
        assert_eq!(cart.lines.len(), 2);
        assert_eq!(cart.total(), 250.0);

        // code "1" wins over id "1"
        let cart = build_cart(&products, &["1".into()]).unwrap();
        assert_eq!(cart.lines[0].product_id, "2");

        assert!(build_cart(&products, &["999".into()]).is_err());
        assert!(build_cart(&products, &["779x20".into()]).is_err());
    }

    #[test]
    fn missing_ticket_is_an_error() {
        assert!(last_ticket(Value::Null).is_err());
        let doc = serde_json::to_value(ReceiptDocument::SaleTicket(SaleTicketDoc::default())).unwrap();
        assert!(matches!(last_ticket(doc).unwrap(), ReceiptDocument::SaleTicket(_)));
    }
}
