use anyhow::bail;
use serde_json::json;
use std::io::{BufRead as _, Write as _};
use zeroize::Zeroizing;

use super::{api_result, emit, fail};
use crate::auth::{self, DeviceAction, LoginOutcome};
use crate::cli::DeviceCommands;
use crate::AppContext;

/// Password from `env_var` if set, else one line from stdin.
fn read_password(env_var: &str) -> anyhow::Result<Zeroizing<String>> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(Zeroizing::new(value));
    }
    eprint!("Contraseña: ");
    std::io::stderr().flush()?;
    let mut line = Zeroizing::new(String::new());
    std::io::stdin().lock().read_line(&mut line)?;
    let trimmed = Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string());
    Ok(trimmed)
}

pub async fn login(
    ctx: &AppContext,
    json: bool,
    usuario: &str,
    password_env: &str,
) -> anyhow::Result<()> {
    let password = read_password(password_env)?;
    let fingerprint = auth::device_fingerprint(&ctx.db).map_err(fail)?;
    let outcome = auth::login(&ctx.api, &ctx.db, usuario, password, &fingerprint)
        .await
        .map_err(fail)?;

    match outcome {
        LoginOutcome::LoggedIn(session) => emit(json, &session, |s| {
            format!(
                "Sesión iniciada: {} ({}), vence {}",
                s.name,
                s.role.as_str(),
                s.expires_at
                    .with_timezone(&chrono::Local)
                    .format("%d/%m/%Y %H:%M")
            )
        }),
        LoginOutcome::PendingApproval { message } => {
            emit(
                json,
                &json!({ "pendiente": true, "mensaje": message, "huella": fingerprint }),
                |_| {
                    format!(
                        "{message}\nHuella de esta caja: {fingerprint}\n\
                         Solicite la aprobación con `tayrona device request`."
                    )
                },
            )
        }
        LoginOutcome::Rejected { message } => bail!(message),
    }
}

pub async fn logout(ctx: &AppContext, json: bool) -> anyhow::Result<()> {
    auth::logout(&ctx.api, &ctx.db).await.map_err(fail)?;
    emit(json, &json!({ "logout": true }), |_| "Sesión cerrada".to_string())
}

pub fn whoami(ctx: &AppContext, json: bool) -> anyhow::Result<()> {
    let session = ctx.session().map_err(fail)?;
    let permissions = session.role.permissions();
    emit(
        json,
        &json!({ "sesion": session, "permisos": permissions }),
        |_| {
            format!(
                "{} ({})\nrol: {}\nvence: {}\npermisos: {}",
                session.name,
                session.username,
                session.role.as_str(),
                session.expires_at.format("%Y-%m-%d %H:%M UTC"),
                permissions.join(", ")
            )
        },
    )
}

pub async fn device(ctx: &AppContext, json: bool, command: DeviceCommands) -> anyhow::Result<()> {
    let fingerprint = auth::device_fingerprint(&ctx.db).map_err(fail)?;
    match command {
        DeviceCommands::Status => {
            let status = api_result(ctx, auth::check_device(&ctx.api, &fingerprint).await)?;
            emit(
                json,
                &json!({ "huella": fingerprint, "estado": status }),
                |_| format!("{fingerprint}\t{}", status.as_str()),
            )
        }
        DeviceCommands::Request { nombre } => {
            let name = nombre.unwrap_or_else(|| format!("Caja {}", &fingerprint[..8]));
            let status = api_result(
                ctx,
                auth::request_approval(&ctx.api, &fingerprint, &name).await,
            )?;
            emit(
                json,
                &json!({ "huella": fingerprint, "nombre": name, "estado": status }),
                |_| format!("Solicitud enviada para \"{name}\": {}", status.as_str()),
            )
        }
        DeviceCommands::List => {
            let session = ctx.session().map_err(fail)?;
            let devices = api_result(ctx, auth::list_devices(&ctx.api, &session).await)?;
            emit(json, &devices, |list| {
                list.iter()
                    .map(|d| {
                        format!(
                            "{}\t{}\t{}\t{}",
                            d.id,
                            d.status.as_str(),
                            d.name.as_deref().unwrap_or("-"),
                            d.fingerprint.as_deref().unwrap_or("-")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        DeviceCommands::Approve { id } => update(ctx, json, &id, DeviceAction::Aprobar).await,
        DeviceCommands::Reject { id } => update(ctx, json, &id, DeviceAction::Rechazar).await,
        DeviceCommands::Revoke { id } => update(ctx, json, &id, DeviceAction::Revocar).await,
    }
}

async fn update(
    ctx: &AppContext,
    json: bool,
    id: &str,
    action: DeviceAction,
) -> anyhow::Result<()> {
    let session = ctx.session().map_err(fail)?;
    api_result(ctx, auth::update_device(&ctx.api, &session, id, action).await)?;
    emit(
        json,
        &json!({ "id": id, "accion": action.as_str() }),
        |_| format!("Dispositivo {id} actualizado"),
    )
}
