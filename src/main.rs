use clap::Parser;
use std::process::ExitCode;

use tayrona_pos_lib::cli::Cli;
use tayrona_pos_lib::config::AppConfig;
use tayrona_pos_lib::{commands, init_logging, AppContext};

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.data_dir.as_deref()).map_err(anyhow::Error::msg)?;
    let _log_guard = init_logging(&config.log_dir());
    let ctx = AppContext::init(config).map_err(anyhow::Error::msg)?;
    commands::dispatch(&ctx, cli.json, cli.command).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "ok": false, "error": format!("{e:#}") })
                );
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
