use anyhow::bail;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{api_result, emit, fail, resolve_range, today, LAST_TICKET_KEY};
use crate::api::ApiError;
use crate::cli::{CajaCommands, MovementKind, TurnosCommands};
use crate::dashboard::{self, DashboardSnapshot};
use crate::data_helpers::write_local_json;
use crate::money::format_ars;
use crate::receipt_renderer::{ReceiptDocument, ShiftCloseDoc};
use crate::shifts::{self, Arqueo, CashSummary, ShiftEventKind};
use crate::{settings, AppContext};

const MIN_WATCH_SECS: u64 = 10;
const MAX_WATCH_SECS: u64 = 300;

fn snapshot_text(s: &DashboardSnapshot) -> String {
    let mut out = Vec::new();
    if s.stale {
        out.push(format!(
            "[sin conexión: datos de hace {} s]",
            s.age_secs.unwrap_or_default()
        ));
    }
    out.push(format!(
        "Turno: {}",
        if s.status.shift_open {
            format!("abierto ({})", s.status.user.as_deref().unwrap_or("-"))
        } else {
            "cerrado".to_string()
        }
    ));
    out.push(format!(
        "Ventas de hoy: {} en {} ventas (ticket promedio {})",
        format_ars(s.sales_today),
        s.sales_count_today,
        format_ars(s.average_ticket)
    ));
    out.push(format!("Efectivo esperado en caja: {}", format_ars(s.expected_cash)));
    if let Some(goal) = &s.goal {
        out.push(format!(
            "Meta diaria: {} de {} ({:.1}%){}",
            format_ars(goal.achieved),
            format_ars(goal.goal),
            goal.percent,
            if goal.reached { " - ¡cumplida!" } else { "" }
        ));
    }
    if s.status.low_stock_products > 0.0 {
        out.push(format!(
            "Productos con stock bajo: {}",
            s.status.low_stock_products
        ));
    }
    out.join("\n")
}

/// Print one watch refresh. An expired session or a failed write ends the
/// watch; other fetch errors are reported and polling continues.
fn show_refresh(
    ctx: &AppContext,
    json: bool,
    result: Result<DashboardSnapshot, ApiError>,
) -> anyhow::Result<()> {
    match result {
        Ok(snapshot) => {
            emit(json, &snapshot, snapshot_text)?;
            if !json {
                println!("---");
            }
            Ok(())
        }
        Err(e) if e.is_auth_failure() => api_result(ctx, Err(e)),
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(())
        }
    }
}

pub async fn dashboard(
    ctx: &AppContext,
    json: bool,
    watch: bool,
    interval: Option<u64>,
) -> anyhow::Result<()> {
    if !watch {
        let snapshot = api_result(ctx, dashboard::fetch_snapshot(&ctx.api, &ctx.db).await)?;
        return emit(json, &snapshot, snapshot_text);
    }

    let interval = interval
        .map(|secs| Duration::from_secs(secs.clamp(MIN_WATCH_SECS, MAX_WATCH_SECS)))
        .unwrap_or_else(|| ctx.config.dashboard_interval());
    let shutdown = CancellationToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = dashboard::spawn_polling(
        ctx.api.clone(),
        ctx.db.clone(),
        interval,
        shutdown.clone(),
        move |result| {
            // Closed once the watch loop below has stopped.
            if tx.send(result).is_err() {
                debug!("dashboard refresh dropped after watch ended");
            }
        },
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let outcome = loop {
        tokio::select! {
            signal = &mut ctrl_c => break signal.map_err(anyhow::Error::from),
            Some(result) = rx.recv() => {
                if let Err(e) = show_refresh(ctx, json, result) {
                    break Err(e);
                }
            }
        }
    };
    info!("stopping dashboard watch");
    shutdown.cancel();
    handle.await?;
    outcome
}

/// Counted cash from an explicit amount or a denomination list.
fn counted_cash(
    contado: Option<f64>,
    billetes: Option<&str>,
) -> anyhow::Result<Option<(f64, Vec<shifts::DenominationCount>)>> {
    match (contado, billetes) {
        (_, Some(raw)) => {
            let breakdown = shifts::parse_denomination_list(raw).map_err(fail)?;
            let total = shifts::count_denominations(&breakdown).map_err(fail)?;
            if let Some(declared) = contado {
                if !crate::money::approx_eq(declared, total) {
                    bail!(
                        "El monto indicado ({}) no coincide con el conteo de billetes ({})",
                        format_ars(declared),
                        format_ars(total)
                    );
                }
            }
            Ok(Some((total, breakdown)))
        }
        (Some(amount), None) => Ok(Some((amount, Vec::new()))),
        (None, None) => Ok(None),
    }
}

fn arqueo_text(a: &Arqueo) -> String {
    let mut out = vec![
        format!("Esperado:   {}", format_ars(a.expected)),
        format!("Contado:    {}", format_ars(a.counted)),
        format!("Diferencia: {} ({})", format_ars(a.difference), a.status.label()),
    ];
    for d in &a.breakdown {
        out.push(format!(
            "  {} x {} = {}",
            d.quantity,
            format_ars(d.denomination),
            format_ars(d.denomination * d.quantity as f64)
        ));
    }
    out.join("\n")
}

fn summary_text(s: &CashSummary) -> String {
    format!(
        "Turno {} - {}\nApertura:        {}\nVentas efectivo: {}\nVentas otros:    {}\n\
         Ingresos:        {}\nEgresos:         {}\nEsperado:        {}",
        s.shift_id.as_deref().unwrap_or("-"),
        if s.is_open { "abierto" } else { "cerrado" },
        format_ars(s.opening),
        format_ars(s.cash_sales),
        format_ars(s.electronic_sales()),
        format_ars(s.income),
        format_ars(s.outflows),
        format_ars(s.expected_cash())
    )
}

pub async fn caja(ctx: &AppContext, json: bool, command: CajaCommands) -> anyhow::Result<()> {
    let tolerance = settings::load_local(&ctx.db).arqueo_tolerance;
    match command {
        CajaCommands::Abrir { monto } => {
            ctx.session().map_err(fail)?.require("abrir_caja").map_err(fail)?;
            let result = api_result(ctx, shifts::open_shift(&ctx.api, monto).await)?;
            emit(json, &result, |_| format!("Turno abierto con {}", format_ars(monto)))
        }
        CajaCommands::Cerrar {
            contado,
            billetes,
            nota,
        } => {
            let session = ctx.session().map_err(fail)?;
            session.require("cerrar_caja").map_err(fail)?;
            let Some((counted, breakdown)) = counted_cash(contado, billetes.as_deref())? else {
                bail!("Indique el efectivo contado o el detalle de billetes (--billetes)");
            };
            let result = api_result(
                ctx,
                shifts::close_shift(&ctx.api, counted, nota.as_deref(), tolerance).await,
            )?;
            let mut arqueo: Arqueo = serde_json::from_value(result["arqueo"].clone())?;
            arqueo.breakdown = breakdown;
            let shift_id = result["turno_id"].as_str().unwrap_or("actual").to_string();
            let doc = ShiftCloseDoc::from_arqueo(
                &arqueo,
                &shift_id,
                &session.name,
                chrono::Local::now().naive_local(),
            );
            let doc = serde_json::to_value(ReceiptDocument::ShiftClose(doc))?;
            write_local_json(&ctx.db, LAST_TICKET_KEY, &doc).map_err(fail)?;
            emit(json, &arqueo, |a| {
                format!(
                    "Turno {shift_id} cerrado.\n{}\nImprima el cierre con `tayrona ticket`.",
                    arqueo_text(a)
                )
            })
        }
        CajaCommands::Movimiento { tipo, monto, motivo } => {
            ctx.session()
                .map_err(fail)?
                .require("movimientos_caja")
                .map_err(fail)?;
            let kind = match tipo {
                MovementKind::Ingreso => ShiftEventKind::Ingreso,
                MovementKind::Egreso => ShiftEventKind::Egreso,
                MovementKind::Retiro => ShiftEventKind::Retiro,
            };
            let result = api_result(
                ctx,
                shifts::register_movement(&ctx.api, kind, monto, &motivo).await,
            )?;
            emit(json, &result, |_| {
                format!("Movimiento registrado: {tipo:?} {}", format_ars(monto))
            })
        }
        CajaCommands::Arqueo { contado, billetes } => {
            let summary = api_result(ctx, shifts::fetch_cash_summary(&ctx.api).await)?;
            match counted_cash(contado, billetes.as_deref())? {
                Some((counted, breakdown)) => {
                    let result = shifts::arqueo(&summary, counted, breakdown, tolerance);
                    emit(json, &result, arqueo_text)
                }
                None => emit(json, &summary, summary_text),
            }
        }
    }
}

pub async fn turnos(ctx: &AppContext, json: bool, command: TurnosCommands) -> anyhow::Result<()> {
    let TurnosCommands::Historial { rango, detalle } = command;
    let range = resolve_range(&rango, today())?;
    let events = api_result(
        ctx,
        shifts::fetch_history(&ctx.api, range.from, range.to).await,
    )?;
    let tolerance = settings::load_local(&ctx.db).arqueo_tolerance;
    let recs = shifts::reconcile_shifts(&events, tolerance);
    let ledger = detalle.then(|| shifts::build_ledger(&events));

    emit(
        json,
        &json!({ "turnos": recs, "libro": ledger }),
        |_| {
            let mut out: Vec<String> = recs
                .iter()
                .map(|r| {
                    format!(
                        "{}\t{}\t{}\tesperado {}\tcontado {}\t{}{}",
                        r.shift_id,
                        r.user.as_deref().unwrap_or("-"),
                        r.opened_at
                            .map(|d| d.format("%d/%m %H:%M").to_string())
                            .unwrap_or_default(),
                        format_ars(r.expected),
                        r.counted.map(format_ars).unwrap_or_else(|| "-".into()),
                        r.status.label(),
                        r.difference
                            .filter(|d| d.abs() > 0.0)
                            .map(|d| format!(" ({})", format_ars(d)))
                            .unwrap_or_default()
                    )
                })
                .collect();
            if let Some(ledger) = &ledger {
                out.push(String::new());
                for line in &ledger.lines {
                    out.push(format!(
                        "{}\t{:?}\t{}\t{} -> {}",
                        line.event
                            .at
                            .map(|d| d.format("%d/%m %H:%M").to_string())
                            .unwrap_or_default(),
                        line.event.kind,
                        format_ars(line.delta),
                        format_ars(line.balance_before),
                        format_ars(line.balance_after)
                    ));
                }
                out.push(format!("Saldo final: {}", format_ars(ledger.final_balance)));
            }
            out.join("\n")
        },
    )
}
