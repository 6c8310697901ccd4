use serde_json::json;
use tracing::warn;

use super::{api_result, emit, fail, resolve_range, today};
use crate::analysis::{self, Analysis};
use crate::api::ApiError;
use crate::cli::{ExportCommands, InventarioCommands, RangeArgs, VentasCommands};
use crate::inventory::{self, fmt_qty, AbcReport, Product};
use crate::money::format_ars;
use crate::sales::{self, DateRange, PeriodComparison, SalesReport};
use crate::{export, shifts, settings, AppContext};

/// Soft-fail a fetch for composite views; session problems still abort.
fn soft<T>(ctx: &AppContext, what: &str, result: Result<T, ApiError>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_auth_failure() => api_result(ctx, Err(e)),
        Err(e) => {
            warn!(error = %e, what, "continuing without data");
            Ok(None)
        }
    }
}

fn pct_change(v: Option<f64>) -> String {
    match v {
        Some(p) => format!("{p:+.1}%"),
        None => "s/d".to_string(),
    }
}

fn abc_text(report: &AbcReport) -> String {
    let mut out = vec![format!("Valor total: {}", format_ars(report.total_value))];
    for (label, t) in [("A", &report.a), ("B", &report.b), ("C", &report.c)] {
        out.push(format!(
            "Clase {label}: {} productos, {} ({:.1}%)",
            t.count,
            format_ars(t.value),
            t.value_pct
        ));
    }
    out.push(String::new());
    out.extend(report.entries.iter().map(|e| {
        format!(
            "{:>3} {} {}\t{}\t{:.1}% (acum. {:.1}%)",
            e.rank,
            e.class.as_str(),
            e.name,
            format_ars(e.value),
            e.value_pct,
            e.cumulative_pct
        )
    }));
    out.join("\n")
}

pub async fn inventario(
    ctx: &AppContext,
    json: bool,
    command: InventarioCommands,
) -> anyhow::Result<()> {
    let products = api_result(ctx, inventory::fetch_products(&ctx.api).await)?;
    match command {
        InventarioCommands::Abc => {
            let report = inventory::classify_abc(&products);
            emit(json, &report, abc_text)
        }
        InventarioCommands::Reponer { dias } => {
            let abc = inventory::classify_abc(&products);
            let suggestions = inventory::suggest_reorders(&products, &abc, dias);
            emit(json, &suggestions, |list| {
                if list.is_empty() {
                    return "No hay productos para reponer".to_string();
                }
                let total: f64 = list.iter().map(|s| s.estimated_cost).sum();
                let mut out: Vec<String> = list
                    .iter()
                    .map(|s| {
                        format!(
                            "[{}] {} ({})\tstock {} / mín {}\tpedir {}\t{}",
                            s.level.label(),
                            s.name,
                            s.abc_class.as_str(),
                            fmt_qty(s.stock),
                            fmt_qty(s.min_stock),
                            fmt_qty(s.suggested_qty),
                            format_ars(s.estimated_cost)
                        )
                    })
                    .collect();
                out.push(format!("Costo estimado total: {}", format_ars(total)));
                out.join("\n")
            })
        }
        InventarioCommands::Resumen => {
            let abc = inventory::classify_abc(&products);
            let summary = inventory::summarize(&products, &abc);
            let alerts = inventory::stock_alerts(&products);
            emit(
                json,
                &json!({ "resumen": summary, "alertas": alerts }),
                |_| {
                    let mut out = vec![
                        format!("Productos: {} ({} unidades)", summary.products, fmt_qty(summary.units)),
                        format!("Valor al costo: {}", format_ars(summary.cost_value)),
                        format!("Valor de venta: {}", format_ars(summary.retail_value)),
                        format!(
                            "Margen potencial: {} ({:.1}%)",
                            format_ars(summary.potential_margin),
                            summary.margin_pct
                        ),
                        format!(
                            "Sin stock {} | crítico {} | bajo {} | normal {} | exceso {}",
                            summary.out_of_stock,
                            summary.critical,
                            summary.low,
                            summary.normal,
                            summary.excess
                        ),
                    ];
                    for a in alerts.iter().take(20) {
                        out.push(format!(
                            "  {}\t{}\tstock {} / mín {}",
                            a.status.label(),
                            a.name,
                            fmt_qty(a.stock),
                            fmt_qty(a.min_stock)
                        ));
                    }
                    out.join("\n")
                },
            )
        }
        InventarioCommands::Buscar { texto, categoria } => {
            let found = inventory::filter_products(&products, texto.as_deref(), categoria.as_deref());
            emit(json, &found, |list| product_lines(list))
        }
    }
}

fn product_lines(list: &[&Product]) -> String {
    if list.is_empty() {
        return "Sin resultados".to_string();
    }
    list.iter()
        .map(|p| {
            format!(
                "{}\t{}\t{}\t{}\tstock {}",
                p.id,
                p.code.as_deref().unwrap_or("-"),
                p.name,
                format_ars(p.sale_price),
                fmt_qty(p.available_stock())
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn report_text(report: &SalesReport, comparison: &PeriodComparison) -> String {
    let mut out = Vec::new();
    if let Some(range) = &report.range {
        out.push(format!("Período {} a {}", range.from, range.to));
    }
    out.push(format!(
        "Ventas: {} en {} tickets ({} vs. período anterior)",
        format_ars(report.gross),
        report.count,
        pct_change(comparison.total_change_pct)
    ));
    out.push(format!(
        "Ticket promedio: {} ({})",
        format_ars(report.average_ticket),
        pct_change(comparison.average_ticket_change_pct)
    ));
    if report.discounts > 0.0 {
        out.push(format!("Descuentos: {}", format_ars(report.discounts)));
    }
    if let (Some(margin), Some(pct)) = (report.margin, report.margin_pct) {
        out.push(format!("Margen: {} ({pct:.1}%)", format_ars(margin)));
    }
    if report.cancelled_count > 0 {
        out.push(format!(
            "Anuladas: {} por {}",
            report.cancelled_count,
            format_ars(report.cancelled_total)
        ));
    }
    for m in &report.by_method {
        out.push(format!(
            "  {}\t{} ({} ventas, {:.1}%)",
            m.label,
            format_ars(m.total),
            m.count,
            m.percent
        ));
    }
    if let Some(hour) = report.busiest_hour() {
        out.push(format!("Hora pico: {:02}:00 ({})", hour.hour, format_ars(hour.total)));
    }
    if !report.top_products.is_empty() {
        out.push("Más vendidos:".to_string());
        for (i, p) in report.top_products.iter().enumerate() {
            out.push(format!(
                "  {}. {}\t{} u.\t{}",
                i + 1,
                p.name,
                fmt_qty(p.quantity),
                format_ars(p.revenue)
            ));
        }
    }
    out.join("\n")
}

pub async fn ventas(ctx: &AppContext, json: bool, command: VentasCommands) -> anyhow::Result<()> {
    let VentasCommands::Reporte { rango, top } = command;
    let range = resolve_range(&rango, today())?;
    let (current, previous, comparison) = api_result(
        ctx,
        sales::fetch_with_comparison(&ctx.api, range, top).await,
    )?;
    let goal = (range == DateRange::single(today()))
        .then(|| sales::load_daily_goal(&ctx.db))
        .flatten()
        .and_then(|g| sales::goal_progress(current.gross, g));

    emit(
        json,
        &json!({
            "actual": current,
            "anterior": previous,
            "comparacion": comparison,
            "meta": goal,
        }),
        |_| {
            let mut text = report_text(&current, &comparison);
            if let Some(g) = &goal {
                text.push_str(&format!(
                    "\nMeta diaria: {:.1}% ({} restantes)",
                    g.percent,
                    format_ars(g.remaining)
                ));
            }
            text
        },
    )
}

fn analysis_text(a: &Analysis) -> String {
    let mut out = Vec::new();
    if let Some(reason) = &a.fallback_reason {
        out.push(format!("(análisis local: {reason})"));
    }
    if a.insights.is_empty() {
        out.push("Sin observaciones".to_string());
    }
    for i in &a.insights {
        out.push(format!("[{}] {}", i.severity.label(), i.title));
        if let Some(detail) = &i.detail {
            out.push(format!("    {detail}"));
        }
    }
    out.join("\n")
}

pub async fn analisis(ctx: &AppContext, json: bool, rango: &RangeArgs) -> anyhow::Result<()> {
    let range = resolve_range(rango, today())?;
    let products = soft(ctx, "products", inventory::fetch_products(&ctx.api).await)?
        .unwrap_or_default();
    let reports = soft(
        ctx,
        "sales",
        sales::fetch_with_comparison(&ctx.api, range, sales::DEFAULT_TOP_PRODUCTS).await,
    )?;
    let (current, previous) = match reports {
        Some((current, previous, _)) => (current, Some(previous)),
        None => (
            sales::build_report(&[], Some(range), sales::DEFAULT_TOP_PRODUCTS),
            None,
        ),
    };
    let result = analysis::analyze(&ctx.api, &products, &current, previous.as_ref()).await;
    emit(json, &result, analysis_text)
}

pub async fn exportar(ctx: &AppContext, json: bool, command: ExportCommands) -> anyhow::Result<()> {
    let (path, rows) = match command {
        ExportCommands::Ventas { rango, salida } => {
            let range = resolve_range(&rango, today())?;
            let rows = api_result(ctx, sales::fetch_sales(&ctx.api, range).await)?;
            let table = export::sales_table(&rows);
            table.write_to(&salida).map_err(fail)?;
            (salida, table.rows.len())
        }
        ExportCommands::Inventario { salida } => {
            let products = api_result(ctx, inventory::fetch_products(&ctx.api).await)?;
            let abc = inventory::classify_abc(&products);
            let table = export::inventory_table(&products, &abc);
            table.write_to(&salida).map_err(fail)?;
            (salida, table.rows.len())
        }
        ExportCommands::Turnos { rango, salida } => {
            let range = resolve_range(&rango, today())?;
            let events = api_result(
                ctx,
                shifts::fetch_history(&ctx.api, range.from, range.to).await,
            )?;
            let tolerance = settings::load_local(&ctx.db).arqueo_tolerance;
            let table = export::shifts_table(&shifts::reconcile_shifts(&events, tolerance));
            table.write_to(&salida).map_err(fail)?;
            (salida, table.rows.len())
        }
    };
    emit(
        json,
        &json!({ "archivo": path, "filas": rows }),
        |_| format!("{rows} filas exportadas a {}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, name: &str, stock: f64, cost: f64) -> Product {
        Product {
            id: id.into(),
            name: name.into(),
            stock,
            cost_price: cost,
            sale_price: cost * 1.5,
            ..Default::default()
        }
    }

    #[test]
    fn abc_text_lists_classes_and_ranks() {
        let products = vec![
            product("1", "Aceite", 10.0, 900.0),
            product("2", "Fideos", 5.0, 100.0),
        ];
        let text = abc_text(&inventory::classify_abc(&products));
        assert!(text.contains("Clase A"));
        assert!(text.contains("Aceite"));
        assert!(text.lines().count() >= 6);
    }

    #[test]
    fn empty_search_says_so() {
        assert_eq!(product_lines(&[]), "Sin resultados");
        let p = product("7", "Yerba", 3.0, 1000.0);
        assert!(product_lines(&[&p]).contains("Yerba"));
    }

    #[test]
    fn percent_change_text() {
        assert_eq!(pct_change(Some(12.34)), "+12.3%");
        assert_eq!(pct_change(Some(-5.0)), "-5.0%");
        assert_eq!(pct_change(None), "s/d");
    }
}
