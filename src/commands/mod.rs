//! Command handler layer for the `tayrona` binary.
//!
//! ## Files
//! - `session.rs`: login/logout/whoami and device approval.
//! - `cash.rs`: dashboard, caja (open/close/movements/arqueo), turno history.
//! - `reports.rs`: inventory, sales report, analysis, CSV export.
//! - `sale.rs`: checkout and ticket printing.
//! - `admin.rs`: store configuration, supervisor PIN, diagnostics.
//!
//! Handlers parse CLI input, call into the library modules and print.
//! Business rules stay in the library.

use anyhow::Context as _;
use chrono::NaiveDate;
use serde::Serialize;

use crate::api::ApiError;
use crate::cli::{Commands, RangeArgs};
use crate::sales::{DateRange, RangePreset};
use crate::AppContext;

pub mod admin;
pub mod cash;
pub mod reports;
pub mod sale;
pub mod session;

/// `local_settings` key (category "local") holding the last printable ticket.
pub(crate) const LAST_TICKET_KEY: &str = "ultimo_ticket";

#[derive(Serialize)]
struct JsonOut<T: Serialize> {
    ok: bool,
    data: T,
}

/// Print `data` as a JSON envelope or as human-readable text.
pub(crate) fn emit<T: Serialize>(
    json: bool,
    data: &T,
    human: impl FnOnce(&T) -> String,
) -> anyhow::Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&JsonOut { ok: true, data })?
        );
    } else {
        let text = human(data);
        if !text.is_empty() {
            println!("{text}");
        }
    }
    Ok(())
}

/// Library errors are user-facing Spanish strings.
pub(crate) fn fail(message: String) -> anyhow::Error {
    anyhow::Error::msg(message)
}

/// Surface an API error, dropping the local session on auth failures.
pub(crate) fn api_result<T>(ctx: &AppContext, result: Result<T, ApiError>) -> anyhow::Result<T> {
    result.map_err(|e| {
        ctx.handle_api_error(&e);
        anyhow::Error::new(e)
    })
}

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Explicit `--desde/--hasta` win over the `--rango` preset.
pub(crate) fn resolve_range(args: &RangeArgs, today: NaiveDate) -> anyhow::Result<DateRange> {
    match (args.desde, args.hasta) {
        (Some(from), Some(to)) => DateRange::new(from, to).map_err(fail),
        (Some(from), None) => DateRange::new(from, today.max(from)).map_err(fail),
        (None, Some(to)) => Ok(DateRange::single(to)),
        (None, None) => {
            let preset = RangePreset::from_value(&args.rango)
                .with_context(|| format!("rango desconocido: {}", args.rango))?;
            Ok(DateRange::preset(preset, today))
        }
    }
}

pub async fn dispatch(ctx: &AppContext, json: bool, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Login {
            usuario,
            password_env,
        } => session::login(ctx, json, &usuario, &password_env).await,
        Commands::Logout => session::logout(ctx, json).await,
        Commands::Whoami => session::whoami(ctx, json),
        Commands::Device { command } => session::device(ctx, json, command).await,
        Commands::Dashboard { watch, interval } => cash::dashboard(ctx, json, watch, interval).await,
        Commands::Caja { command } => cash::caja(ctx, json, command).await,
        Commands::Turnos { command } => cash::turnos(ctx, json, command).await,
        Commands::Inventario { command } => reports::inventario(ctx, json, command).await,
        Commands::Ventas { command } => reports::ventas(ctx, json, command).await,
        Commands::Analisis { rango } => reports::analisis(ctx, json, &rango).await,
        Commands::Exportar { command } => reports::exportar(ctx, json, command).await,
        Commands::Vender(args) => sale::vender(ctx, json, args).await,
        Commands::Ticket {
            formato,
            salida,
            ancho,
        } => sale::ticket(ctx, formato, salida.as_deref(), ancho),
        Commands::Config { command } => admin::config(ctx, json, command).await,
        Commands::Pin { command } => admin::pin(ctx, json, command),
        Commands::Diagnostico => admin::diagnostico(ctx, json).await,
    }
}
