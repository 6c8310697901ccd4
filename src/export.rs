//! CSV export of sales, inventory and turno reconciliations.
//!
//! Files open cleanly in a Spanish-locale Excel: UTF-8 BOM, `;` between
//! columns and `,` as decimal separator.

use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::inventory::{stock_status, urgency_score, AbcReport, Product, UrgencyLevel};
use crate::money::round2;
use crate::sales::Sale;
use crate::shifts::ShiftReconciliation;

/// UTF-8 BOM so Excel picks the right encoding.
const BOM: &str = "\u{FEFF}";
const SEP: &str = ";";

fn escape_csv(value: &str) -> String {
    if value.contains(';') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn num(value: f64) -> String {
    format!("{:.2}", round2(value)).replace('.', ",")
}

fn opt_num(value: Option<f64>) -> String {
    value.map(num).unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn to_csv_string(&self) -> String {
        let mut out = String::from(BOM);
        out.push_str(&self.headers.join(SEP));
        out.push_str("\r\n");
        for row in &self.rows {
            let line: Vec<String> = row.iter().map(|v| escape_csv(v)).collect();
            out.push_str(&line.join(SEP));
            out.push_str("\r\n");
        }
        out
    }

    /// Write the table to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let mut file = fs::File::create(path)
            .map_err(|e| format!("No se pudo crear {}: {e}", path.display()))?;
        file.write_all(self.to_csv_string().as_bytes())
            .map_err(|e| e.to_string())?;
        info!(path = %path.display(), rows = self.rows.len(), "csv written");
        Ok(())
    }
}

pub fn sales_table(sales: &[Sale]) -> CsvTable {
    let rows = sales
        .iter()
        .map(|s| {
            vec![
                s.id.clone(),
                s.at.map(|d| d.format("%d/%m/%Y %H:%M").to_string())
                    .unwrap_or_default(),
                s.user.clone().unwrap_or_default(),
                s.payment_method.label().to_string(),
                s.items.len().to_string(),
                num(s.discount),
                num(s.total),
                opt_num(s.cost()),
                if s.is_cancelled() { "Anulada" } else { "Completada" }.to_string(),
            ]
        })
        .collect();
    CsvTable {
        headers: vec![
            "Numero", "Fecha", "Usuario", "Metodo Pago", "Items", "Descuento", "Total", "Costo",
            "Estado",
        ],
        rows,
    }
}

pub fn inventory_table(products: &[Product], abc: &AbcReport) -> CsvTable {
    let rows = products
        .iter()
        .map(|p| {
            let urgency = urgency_score(p.stock, p.min_stock);
            vec![
                p.code.clone().unwrap_or_default(),
                p.name.clone(),
                p.category.clone().unwrap_or_default(),
                crate::inventory::fmt_qty(p.stock),
                crate::inventory::fmt_qty(p.min_stock),
                num(p.cost_price),
                num(p.sale_price),
                num(p.inventory_value()),
                abc.class_of(&p.id)
                    .unwrap_or_default()
                    .as_str()
                    .to_string(),
                urgency.to_string(),
                UrgencyLevel::from_score(urgency).label().to_string(),
                stock_status(p).label().to_string(),
            ]
        })
        .collect();
    CsvTable {
        headers: vec![
            "Codigo", "Nombre", "Categoria", "Stock", "Stock Minimo", "Precio Costo",
            "Precio Venta", "Valor Stock", "Clase ABC", "Urgencia", "Nivel Urgencia", "Estado",
        ],
        rows,
    }
}

pub fn shifts_table(recs: &[ShiftReconciliation]) -> CsvTable {
    let rows = recs
        .iter()
        .map(|r| {
            vec![
                r.shift_id.clone(),
                r.user.clone().unwrap_or_default(),
                r.opened_at
                    .map(|d| d.format("%d/%m/%Y %H:%M").to_string())
                    .unwrap_or_default(),
                r.closed_at
                    .map(|d| d.format("%d/%m/%Y %H:%M").to_string())
                    .unwrap_or_default(),
                num(r.opening),
                num(r.sales),
                num(r.income),
                num(r.outflows),
                num(r.expected),
                opt_num(r.counted),
                opt_num(r.difference),
                r.status.label().to_string(),
            ]
        })
        .collect();
    CsvTable {
        headers: vec![
            "Turno", "Usuario", "Apertura", "Cierre", "Monto Inicial", "Ventas", "Ingresos",
            "Egresos", "Esperado", "Contado", "Diferencia", "Estado",
        ],
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::classify_abc;
    use crate::sales::parse_sales;
    use crate::shifts::{reconcile_shifts, ShiftEvent, ShiftEventKind};

    #[test]
    fn escapes_separator_quotes_and_newlines() {
        assert_eq!(escape_csv("simple"), "simple");
        assert_eq!(escape_csv("a;b"), "\"a;b\"");
        assert_eq!(escape_csv("dice \"hola\""), "\"dice \"\"hola\"\"\"");
        assert_eq!(escape_csv("dos\nlineas"), "\"dos\nlineas\"");
    }

    #[test]
    fn sales_csv_has_bom_and_decimal_comma() {
        let sales = parse_sales(&serde_json::json!([
            { "id": 10, "fecha": "2024-05-10 09:15:00", "monto_total": 1234.5,
              "metodo_pago": "efectivo", "usuario": "Pérez; Juan" },
            { "id": 11, "monto_total": 99, "estado": "anulada" }
        ]));
        let csv = sales_table(&sales).to_csv_string();
        assert!(csv.starts_with('\u{FEFF}'));
        let lines: Vec<&str> = csv.trim_start_matches('\u{FEFF}').lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Numero;Fecha;"));
        assert_eq!(
            lines[1],
            "10;10/05/2024 09:15;\"Pérez; Juan\";Efectivo;0;0,00;1234,50;;Completada"
        );
        assert!(lines[2].ends_with("Anulada"));
    }

    #[test]
    fn inventory_csv_carries_class_and_urgency() {
        let products: Vec<Product> = vec![
            Product {
                id: "1".into(),
                name: "Aceite".into(),
                stock: 0.0,
                min_stock: 5.0,
                cost_price: 2000.0,
                sale_price: 2800.0,
                ..Default::default()
            },
            Product {
                id: "2".into(),
                name: "Arroz".into(),
                stock: 50.0,
                min_stock: 10.0,
                cost_price: 900.0,
                sale_price: 1300.0,
                ..Default::default()
            },
        ];
        let abc = classify_abc(&products);
        let table = inventory_table(&products, &abc);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][8], "C");
        assert_eq!(table.rows[0][9], "100");
        assert_eq!(table.rows[1][8], "A");
        assert_eq!(table.rows[1][7], "45000,00");
    }

    #[test]
    fn shifts_csv_and_file_output() {
        let events = vec![
            ShiftEvent {
                id: "1".into(),
                shift_id: "4".into(),
                kind: ShiftEventKind::Apertura,
                amount: 1000.0,
                at: crate::data_helpers::parse_timestamp("2024-05-01 08:00:00"),
                user: Some("ana".into()),
                expected: None,
                note: None,
            },
            ShiftEvent {
                id: "2".into(),
                shift_id: "4".into(),
                kind: ShiftEventKind::Cierre,
                amount: 1000.0,
                at: crate::data_helpers::parse_timestamp("2024-05-01 20:00:00"),
                user: Some("ana".into()),
                expected: None,
                note: None,
            },
        ];
        let table = shifts_table(&reconcile_shifts(&events, 10.0));
        assert_eq!(table.rows[0][10], "0,00");
        assert_eq!(table.rows[0][11], "Cuadrado");

        let dir = std::env::temp_dir().join(format!("tayrona-export-{}", uuid::Uuid::new_v4()));
        let path = dir.join("turnos.csv");
        table.write_to(&path).expect("write csv");
        let written = fs::read_to_string(&path).expect("read back");
        assert!(written.contains("Turno;Usuario;"));
        let _ = fs::remove_dir_all(&dir);
    }
}
