use anyhow::bail;
use serde_json::{json, Value};
use tracing::warn;

use super::{api_result, emit, fail};
use crate::auth::SupervisorPin;
use crate::cli::{ConfigCommands, PinCommands};
use crate::config::normalize_api_url;
use crate::settings::{self, StoreSettings};
use crate::{diagnostics, sales, AppContext};

fn settings_text(pairs: &[(&'static str, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k:<20} {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Apply `key=value` to a copy of `current`; unknown keys are rejected.
fn updated_settings(current: &StoreSettings, key: &str, value: &str) -> anyhow::Result<StoreSettings> {
    let key = key.trim();
    if !current.to_pairs().iter().any(|(k, _)| *k == key) {
        let known: Vec<&str> = current.to_pairs().into_iter().map(|(k, _)| k).collect();
        bail!("Clave desconocida: {key}. Claves válidas: {}", known.join(", "));
    }
    let mut next = current.clone();
    next.apply(key, &Value::String(value.to_string()));
    next.validate().map_err(fail)?;
    Ok(next)
}

pub async fn config(ctx: &AppContext, json: bool, command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Ver => {
            let (store, cached) = match settings::fetch(&ctx.api, &ctx.db).await {
                Ok(s) => (s, false),
                Err(e) => {
                    ctx.handle_api_error(&e);
                    if e.is_auth_failure() {
                        return Err(e.into());
                    }
                    warn!(error = %e, "showing last known store settings");
                    (settings::load_local(&ctx.db), true)
                }
            };
            let goal = sales::load_daily_goal(&ctx.db);
            emit(
                json,
                &json!({
                    "tienda": settings::to_object(&store),
                    "sin_conexion": cached,
                    "terminal": ctx.config,
                    "meta_diaria": goal,
                }),
                |_| {
                    let mut out = Vec::new();
                    if cached {
                        out.push("[sin conexión: configuración guardada]".to_string());
                    }
                    out.push(settings_text(&store.to_pairs()));
                    out.push(String::new());
                    out.push(format!("{:<20} {}", "api", ctx.config.api_base_url));
                    out.push(format!("{:<20} {}", "datos", ctx.config.data_dir.display()));
                    out.push(format!(
                        "{:<20} {}",
                        "meta local",
                        goal.map(crate::money::format_ars).unwrap_or_else(|| "-".into())
                    ));
                    out.join("\n")
                },
            )
        }
        ConfigCommands::Meta { monto } => {
            sales::save_daily_goal(&ctx.db, monto).map_err(fail)?;
            emit(json, &json!({ "meta_diaria": monto }), |_| {
                if monto > 0.0 {
                    format!("Meta diaria: {}", crate::money::format_ars(monto))
                } else {
                    "Meta diaria eliminada".to_string()
                }
            })
        }
        ConfigCommands::Set { clave, valor } => {
            ctx.session().map_err(fail)?.require("configurar").map_err(fail)?;
            let current = match settings::fetch(&ctx.api, &ctx.db).await {
                Ok(s) => s,
                Err(e) => {
                    ctx.handle_api_error(&e);
                    return Err(e.into());
                }
            };
            let next = updated_settings(&current, &clave, &valor)?;
            api_result(ctx, settings::save(&ctx.api, &ctx.db, &next).await)?;
            emit(json, &settings::to_object(&next), |_| {
                format!("{} actualizado", clave.trim())
            })
        }
        ConfigCommands::Api { url } => {
            let mut cfg = ctx.config.clone();
            cfg.api_base_url = normalize_api_url(&url);
            cfg.save().map_err(fail)?;
            emit(json, &json!({ "api": cfg.api_base_url }), |_| {
                format!("API configurada: {}", cfg.api_base_url)
            })
        }
    }
}

pub fn pin(ctx: &AppContext, json: bool, command: PinCommands) -> anyhow::Result<()> {
    let PinCommands::Set { pin } = command;
    ctx.session()
        .map_err(fail)?
        .require("autorizar_descuento")
        .map_err(fail)?;
    let supervisor = SupervisorPin::new(&ctx.db);
    let replaced = supervisor.is_configured();
    supervisor.set(&pin).map_err(fail)?;
    emit(json, &json!({ "pin_configurado": true, "reemplazado": replaced }), |_| {
        "PIN de supervisor guardado".to_string()
    })
}

pub async fn diagnostico(ctx: &AppContext, json: bool) -> anyhow::Result<()> {
    let about = diagnostics::get_about_info();
    let health = diagnostics::get_local_health(&ctx.db).map_err(fail)?;
    let connectivity = ctx.api.test_connectivity().await;
    let local_settings = diagnostics::dump_local_settings(&ctx.db).map_err(fail)?;
    emit(
        json,
        &json!({
            "acerca_de": about,
            "salud_local": health,
            "conectividad": connectivity,
            "api": ctx.api.base_url(),
            "configuracion_local": local_settings,
        }),
        |report| serde_json::to_string_pretty(report).unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_known_key_validates() {
        let current = StoreSettings::default();
        let next = updated_settings(&current, "descuento_maximo", "25").unwrap();
        assert_eq!(next.max_discount_pct, 25.0);
        assert_eq!(current.max_discount_pct, 15.0);

        let err = updated_settings(&current, "descuento_maximo", "150").unwrap_err();
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn unknown_key_lists_valid_ones() {
        let err = updated_settings(&StoreSettings::default(), "color", "rojo").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("color"));
        assert!(msg.contains("ancho_ticket"));
    }

    #[test]
    fn settings_text_aligns_pairs() {
        let text = settings_text(&StoreSettings::default().to_pairs());
        assert!(text.lines().any(|l| l.starts_with("ancho_ticket") && l.ends_with("80")));
    }
}
