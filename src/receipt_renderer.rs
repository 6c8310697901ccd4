use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::checkout::{Cart, Settlement};
use crate::money;
use crate::settings::StoreSettings;
use crate::shifts::Arqueo;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PaperWidth {
    #[serde(rename = "58")]
    Mm58,
    #[default]
    #[serde(rename = "80")]
    Mm80,
}

impl PaperWidth {
    pub fn from_mm(mm: u32) -> Self {
        if mm <= 58 {
            Self::Mm58
        } else {
            Self::Mm80
        }
    }

    pub fn mm(&self) -> u32 {
        match self {
            Self::Mm58 => 58,
            Self::Mm80 => 80,
        }
    }

    /// Characters per line in plain-text output.
    pub fn columns(&self) -> usize {
        match self {
            Self::Mm58 => 32,
            Self::Mm80 => 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TicketItem {
    pub name: String,
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default)]
    pub discount: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaymentLine {
    pub label: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SaleTicketDoc {
    pub sale_number: String,
    pub created_at: String,
    #[serde(default)]
    pub cashier: Option<String>,
    #[serde(default)]
    pub items: Vec<TicketItem>,
    pub subtotal: f64,
    #[serde(default)]
    pub discount: f64,
    pub total: f64,
    #[serde(default)]
    pub payments: Vec<PaymentLine>,
    #[serde(default)]
    pub received: Option<f64>,
    #[serde(default)]
    pub change: f64,
}

impl SaleTicketDoc {
    pub fn from_checkout(
        cart: &Cart,
        settlement: &Settlement,
        sale_number: &str,
        cashier: Option<&str>,
        at: NaiveDateTime,
    ) -> Self {
        Self {
            sale_number: sale_number.to_string(),
            created_at: at.format("%d/%m/%Y %H:%M").to_string(),
            cashier: cashier.map(str::to_string),
            items: cart
                .lines
                .iter()
                .map(|l| TicketItem {
                    name: l.name.clone(),
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    discount: l.discount_amount(),
                    total: l.total(),
                })
                .collect(),
            subtotal: cart.gross(),
            discount: cart.total_discount(),
            total: cart.total(),
            payments: settlement
                .payments
                .iter()
                .map(|p| PaymentLine {
                    label: p.method.label().to_string(),
                    amount: p.amount,
                })
                .collect(),
            received: settlement.received,
            change: settlement.change,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShiftCloseDoc {
    pub shift_id: String,
    pub cashier: String,
    pub closed_at: String,
    pub total_sales: f64,
    pub electronic_sales: f64,
    pub expected_cash: f64,
    pub counted_cash: f64,
    pub difference: f64,
    pub status: String,
}

impl ShiftCloseDoc {
    pub fn from_arqueo(
        arqueo: &Arqueo,
        shift_id: &str,
        cashier: &str,
        at: NaiveDateTime,
    ) -> Self {
        Self {
            shift_id: shift_id.to_string(),
            cashier: cashier.to_string(),
            closed_at: at.format("%d/%m/%Y %H:%M").to_string(),
            total_sales: arqueo.total_sales,
            electronic_sales: arqueo.electronic_sales,
            expected_cash: arqueo.expected,
            counted_cash: arqueo.counted,
            difference: arqueo.difference,
            status: arqueo.status.label().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "doc", rename_all = "snake_case")]
pub enum ReceiptDocument {
    SaleTicket(SaleTicketDoc),
    ShiftClose(ShiftCloseDoc),
}

#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub paper_width: PaperWidth,
    pub business_name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub cuit: Option<String>,
    pub footer_text: Option<String>,
    pub copy_label: Option<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            paper_width: PaperWidth::Mm80,
            business_name: "Tayrona Almacén".to_string(),
            address: None,
            phone: None,
            cuit: None,
            footer_text: Some("¡Gracias por su compra!".to_string()),
            copy_label: None,
        }
    }
}

impl From<&StoreSettings> for LayoutConfig {
    fn from(s: &StoreSettings) -> Self {
        let non_empty = |v: &str| {
            let t = v.trim();
            (!t.is_empty()).then(|| t.to_string())
        };
        Self {
            paper_width: PaperWidth::from_mm(s.ticket_width_mm),
            business_name: non_empty(&s.business_name)
                .unwrap_or_else(|| LayoutConfig::default().business_name),
            address: non_empty(&s.address),
            phone: non_empty(&s.phone),
            cuit: non_empty(&s.cuit),
            footer_text: non_empty(&s.ticket_footer),
            copy_label: None,
        }
    }
}

fn esc(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn ars(value: f64) -> String {
    money::format_ars(value)
}

fn qty(value: f64) -> String {
    crate::inventory::fmt_qty(value)
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(8);
    let mut out = Vec::new();
    let mut line = String::new();
    for token in text.split_whitespace() {
        // Hard-split tokens that cannot fit on any line.
        let mut token: String = token.to_string();
        while token.chars().count() > width {
            if !line.is_empty() {
                out.push(std::mem::take(&mut line));
            }
            let head: String = token.chars().take(width).collect();
            token = token.chars().skip(width).collect();
            out.push(head);
        }
        if token.is_empty() {
            continue;
        }
        if line.is_empty() {
            line = token;
            continue;
        }
        let next_len = line.chars().count() + 1 + token.chars().count();
        if next_len > width {
            out.push(std::mem::replace(&mut line, token));
        } else {
            line.push(' ');
            line.push_str(&token);
        }
    }
    if !line.is_empty() {
        out.push(line);
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

fn html_shell(title: &str, body: &str, width: PaperWidth) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
<meta charset="UTF-8"/>
<meta name="viewport" content="width=device-width, initial-scale=1.0"/>
<title>{title}</title>
<style>
@page {{ size: {mm}mm auto; margin: 0; }}
body {{ font-family: ui-monospace, SFMono-Regular, Menlo, monospace; width: {mm}mm; margin: 0; padding: 4mm; box-sizing: border-box; background: #fff; color: #111; }}
.line {{ display: flex; justify-content: space-between; gap: 8px; font-size: 10px; }}
.line strong {{ font-size: 12px; }}
.section {{ margin-top: 8px; border-top: 1px dashed #111; padding-top: 6px; }}
.note {{ color: #555; font-size: 9px; }}
.center {{ text-align: center; }}
.brand {{ font-size: 13px; font-weight: bold; }}
</style>
</head>
<body>{body}</body>
</html>"#,
        title = esc(title),
        mm = width.mm(),
        body = body
    )
}

fn html_line(label: &str, value: &str) -> String {
    format!(
        "<div class=\"line\"><span>{}</span><span>{}</span></div>",
        esc(label),
        esc(value)
    )
}

fn html_header(cfg: &LayoutConfig) -> String {
    let mut body = format!(
        "<div class=\"center brand\">{}</div>",
        esc(&cfg.business_name)
    );
    for extra in [&cfg.address, &cfg.phone] {
        if let Some(v) = extra {
            body.push_str(&format!("<div class=\"center note\">{}</div>", esc(v)));
        }
    }
    if let Some(cuit) = &cfg.cuit {
        body.push_str(&format!("<div class=\"center note\">CUIT {}</div>", esc(cuit)));
    }
    if let Some(label) = &cfg.copy_label {
        body.push_str(&format!("<div class=\"center\">{}</div>", esc(label)));
    }
    body
}

pub fn render_html(document: &ReceiptDocument, cfg: &LayoutConfig) -> String {
    let mut body = html_header(cfg);
    match document {
        ReceiptDocument::SaleTicket(doc) => {
            body.push_str("<div class=\"section\">");
            body.push_str(&html_line("Ticket", &format!("#{}", doc.sale_number)));
            body.push_str(&html_line("Fecha", &doc.created_at));
            if let Some(cashier) = &doc.cashier {
                body.push_str(&html_line("Cajero", cashier));
            }
            body.push_str("</div><div class=\"section\">");
            for item in &doc.items {
                body.push_str(&html_line(
                    &format!("{} x {}", qty(item.quantity), item.name),
                    &ars(item.total),
                ));
                if item.quantity != 1.0 {
                    body.push_str(&format!(
                        "<div class=\"note\">&nbsp;&nbsp;{} c/u</div>",
                        esc(&ars(item.unit_price))
                    ));
                }
                if item.discount > 0.0 {
                    body.push_str(&format!(
                        "<div class=\"note\">&nbsp;&nbsp;Descuento -{}</div>",
                        esc(&ars(item.discount))
                    ));
                }
            }
            body.push_str("</div><div class=\"section\">");
            body.push_str(&html_line("Subtotal", &ars(doc.subtotal)));
            if doc.discount > 0.0 {
                body.push_str(&html_line("Descuento", &format!("-{}", ars(doc.discount))));
            }
            body.push_str(&format!(
                "<div class=\"line\"><strong>TOTAL</strong><strong>{}</strong></div>",
                esc(&ars(doc.total))
            ));
            body.push_str("</div><div class=\"section\">");
            for p in &doc.payments {
                body.push_str(&html_line(&p.label, &ars(p.amount)));
            }
            if let Some(received) = doc.received {
                body.push_str(&html_line("Recibido", &ars(received)));
            }
            if doc.change > 0.0 {
                body.push_str(&html_line("Vuelto", &ars(doc.change)));
            }
            body.push_str("</div>");
        }
        ReceiptDocument::ShiftClose(doc) => {
            body.push_str("<div class=\"section\"><div class=\"center\"><strong>CIERRE DE TURNO</strong></div>");
            body.push_str(&html_line("Turno", &doc.shift_id));
            body.push_str(&html_line("Cajero", &doc.cashier));
            body.push_str(&html_line("Fecha", &doc.closed_at));
            body.push_str("</div><div class=\"section\">");
            body.push_str(&html_line("Ventas totales", &ars(doc.total_sales)));
            body.push_str(&html_line("Ventas electrónicas", &ars(doc.electronic_sales)));
            body.push_str(&html_line("Efectivo esperado", &ars(doc.expected_cash)));
            body.push_str(&html_line("Efectivo contado", &ars(doc.counted_cash)));
            body.push_str(&format!(
                "<div class=\"line\"><strong>{}</strong><strong>{}</strong></div>",
                esc(&doc.status),
                esc(&ars(doc.difference))
            ));
            body.push_str("</div>");
        }
    }
    if let Some(footer) = &cfg.footer_text {
        body.push_str(&format!(
            "<div class=\"section center note\">{}</div>",
            esc(footer)
        ));
    }
    let title = match document {
        ReceiptDocument::SaleTicket(doc) => format!("Ticket {}", doc.sale_number),
        ReceiptDocument::ShiftClose(doc) => format!("Cierre turno {}", doc.shift_id),
    };
    html_shell(&title, &body, cfg.paper_width)
}

// ---------------------------------------------------------------------------
// Plain text
// ---------------------------------------------------------------------------

struct TextBuilder {
    width: usize,
    out: String,
}

impl TextBuilder {
    fn new(width: usize) -> Self {
        Self {
            width,
            out: String::new(),
        }
    }

    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn center(&mut self, text: &str) {
        for part in wrap(text, self.width) {
            let len = part.chars().count();
            let pad = self.width.saturating_sub(len) / 2;
            self.line(&format!("{}{}", " ".repeat(pad), part));
        }
    }

    fn rule(&mut self) {
        self.line(&"-".repeat(self.width));
    }

    /// Label left, value right. Labels that do not fit wrap above the value.
    fn pair(&mut self, label: &str, value: &str) {
        let value_len = value.chars().count();
        let room = self.width.saturating_sub(value_len + 1);
        let body = label.trim_start();
        let indent = &label[..label.len() - body.len()];
        let mut parts: Vec<String> = wrap(body, room.saturating_sub(indent.len()).max(8))
            .into_iter()
            .map(|p| format!("{indent}{p}"))
            .collect();
        let last = parts.pop().unwrap_or_default();
        for p in parts {
            self.line(&p);
        }
        let last_len = last.chars().count();
        if last_len + 1 + value_len > self.width {
            self.line(&last);
            let pad = self.width.saturating_sub(value_len);
            self.line(&format!("{}{}", " ".repeat(pad), value));
        } else {
            let pad = self.width - last_len - value_len;
            self.line(&format!("{}{}{}", last, " ".repeat(pad), value));
        }
    }

    fn finish(self) -> String {
        self.out
    }
}

fn text_header(b: &mut TextBuilder, cfg: &LayoutConfig) {
    b.center(&cfg.business_name.to_uppercase());
    for extra in [&cfg.address, &cfg.phone] {
        if let Some(v) = extra {
            b.center(v);
        }
    }
    if let Some(cuit) = &cfg.cuit {
        b.center(&format!("CUIT {cuit}"));
    }
    if let Some(label) = &cfg.copy_label {
        b.center(label);
    }
    b.rule();
}

pub fn render_text(document: &ReceiptDocument, cfg: &LayoutConfig) -> String {
    let mut b = TextBuilder::new(cfg.paper_width.columns());
    text_header(&mut b, cfg);
    match document {
        ReceiptDocument::SaleTicket(doc) => {
            b.pair("Ticket", &format!("#{}", doc.sale_number));
            b.pair("Fecha", &doc.created_at);
            if let Some(cashier) = &doc.cashier {
                b.pair("Cajero", cashier);
            }
            b.rule();
            for item in &doc.items {
                for part in wrap(&item.name, b.width) {
                    b.line(&part);
                }
                b.pair(
                    &format!("  {} x {}", qty(item.quantity), ars(item.unit_price)),
                    &ars(item.total),
                );
                if item.discount > 0.0 {
                    b.pair("  Descuento", &format!("-{}", ars(item.discount)));
                }
            }
            b.rule();
            b.pair("Subtotal", &ars(doc.subtotal));
            if doc.discount > 0.0 {
                b.pair("Descuento", &format!("-{}", ars(doc.discount)));
            }
            b.pair("TOTAL", &ars(doc.total));
            b.rule();
            for p in &doc.payments {
                b.pair(&p.label, &ars(p.amount));
            }
            if let Some(received) = doc.received {
                b.pair("Recibido", &ars(received));
            }
            if doc.change > 0.0 {
                b.pair("Vuelto", &ars(doc.change));
            }
        }
        ReceiptDocument::ShiftClose(doc) => {
            b.center("CIERRE DE TURNO");
            b.pair("Turno", &doc.shift_id);
            b.pair("Cajero", &doc.cashier);
            b.pair("Fecha", &doc.closed_at);
            b.rule();
            b.pair("Ventas totales", &ars(doc.total_sales));
            b.pair("Ventas electrónicas", &ars(doc.electronic_sales));
            b.pair("Efectivo esperado", &ars(doc.expected_cash));
            b.pair("Efectivo contado", &ars(doc.counted_cash));
            b.pair(&doc.status.to_uppercase(), &ars(doc.difference));
        }
    }
    if let Some(footer) = &cfg.footer_text {
        b.rule();
        b.center(footer);
    }
    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::settle_single;
    use crate::inventory::Product;
    use crate::sales::PaymentMethod;
    use crate::shifts::ReconciliationStatus;

    fn sample_ticket() -> ReceiptDocument {
        ReceiptDocument::SaleTicket(SaleTicketDoc {
            sale_number: "1042".to_string(),
            created_at: "10/05/2024 18:40".to_string(),
            cashier: Some("María".to_string()),
            items: vec![
                TicketItem {
                    name: "Alfajor <Triple> & Co".to_string(),
                    quantity: 2.0,
                    unit_price: 850.0,
                    discount: 0.0,
                    total: 1700.0,
                },
                TicketItem {
                    name: "Gaseosa cola 2,25 litros retornable edición especial".to_string(),
                    quantity: 1.0,
                    unit_price: 2300.0,
                    discount: 230.0,
                    total: 2070.0,
                },
            ],
            subtotal: 4000.0,
            discount: 230.0,
            total: 3770.0,
            payments: vec![PaymentLine {
                label: "Efectivo".to_string(),
                amount: 3770.0,
            }],
            received: Some(5000.0),
            change: 1230.0,
        })
    }

    #[test]
    fn html_is_escaped_and_sized() {
        let html = render_html(&sample_ticket(), &LayoutConfig::default());
        assert!(html.contains("Alfajor &lt;Triple&gt; &amp; Co"));
        assert!(!html.contains("<Triple>"));
        assert!(html.contains("width: 80mm"));
        assert!(html.contains("$ 3.770,00"));
        assert!(html.contains("Vuelto"));

        let narrow = LayoutConfig {
            paper_width: PaperWidth::Mm58,
            business_name: "Kiosco \"El Sol\"".to_string(),
            ..LayoutConfig::default()
        };
        let html = render_html(&sample_ticket(), &narrow);
        assert!(html.contains("width: 58mm"));
        assert!(html.contains("Kiosco &quot;El Sol&quot;"));
    }

    #[test]
    fn text_respects_column_width() {
        for width in [PaperWidth::Mm58, PaperWidth::Mm80] {
            let cfg = LayoutConfig {
                paper_width: width,
                address: Some("Av. Siempre Viva 742, Santa Marta".to_string()),
                cuit: Some("20-12345678-9".to_string()),
                ..LayoutConfig::default()
            };
            let text = render_text(&sample_ticket(), &cfg);
            for line in text.lines() {
                assert!(
                    line.chars().count() <= width.columns(),
                    "line too wide for {width:?}: {line:?}"
                );
            }
            assert!(text.contains("TAYRONA ALMACÉN"));
            assert!(text.contains("CUIT 20-12345678-9"));
            let total = text.lines().find(|l| l.starts_with("TOTAL")).expect("total line");
            assert!(total.ends_with("$ 3.770,00"));
            assert_eq!(total.chars().count(), width.columns());
        }
    }

    #[test]
    fn ticket_from_checkout() {
        let mut cart = Cart::new();
        let product = Product {
            id: "5".into(),
            name: "Pan lactal".into(),
            stock: 10.0,
            sale_price: 1500.0,
            ..Default::default()
        };
        cart.add_product(&product, 2.0).expect("add");
        let settlement = settle_single(PaymentMethod::Efectivo, cart.total(), Some(5000.0)).expect("cash");
        let at = crate::data_helpers::parse_timestamp("2024-05-10 18:40:00").expect("ts");
        let doc = SaleTicketDoc::from_checkout(&cart, &settlement, "77", Some("ana"), at);
        assert_eq!(doc.total, 3000.0);
        assert_eq!(doc.change, 2000.0);
        assert_eq!(doc.created_at, "10/05/2024 18:40");
        assert_eq!(doc.payments[0].label, "Efectivo");

        let text = render_text(&ReceiptDocument::SaleTicket(doc), &LayoutConfig::default());
        assert!(text.contains("Pan lactal"));
        assert!(text.contains("2 x $ 1.500,00"));
    }

    #[test]
    fn shift_close_ticket() {
        let arqueo = Arqueo {
            expected: 33_500.0,
            counted: 33_400.0,
            difference: -100.0,
            status: ReconciliationStatus::Faltante,
            total_sales: 41_500.5,
            electronic_sales: 16_500.5,
            breakdown: Vec::new(),
        };
        let at = crate::data_helpers::parse_timestamp("2024-05-10 22:00:00").expect("ts");
        let doc = ReceiptDocument::ShiftClose(ShiftCloseDoc::from_arqueo(&arqueo, "12", "maria", at));
        let text = render_text(&doc, &LayoutConfig::default());
        assert!(text.contains("CIERRE DE TURNO"));
        assert!(text.contains("FALTANTE"));
        assert!(text.contains("-$ 100,00"));
    }

    #[test]
    fn wrap_splits_long_tokens() {
        let lines = wrap("supercalifragilisticoespialidoso corto", 10);
        assert_eq!(lines, vec!["supercalif", "ragilistic", "oespialido", "so corto"]);
        assert_eq!(wrap("", 32), vec![String::new()]);
    }
}
