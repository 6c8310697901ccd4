use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Accepts `1500`, `1500.50`, `1.500,50` or `$ 1.500,50`.
fn parse_amount(raw: &str) -> Result<f64, String> {
    crate::money::parse_ars(raw).ok_or_else(|| format!("monto inválido: {raw}"))
}

fn parse_date(raw: &str) -> Result<chrono::NaiveDate, String> {
    crate::data_helpers::parse_timestamp(raw)
        .map(|dt| dt.date())
        .ok_or_else(|| format!("fecha inválida: {raw} (use AAAA-MM-DD)"))
}

#[derive(Parser, Debug)]
#[command(name = "tayrona", version, about = "Tayrona Almacén - punto de venta")]
pub struct Cli {
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    pub json: bool,
    #[arg(long, global = true, env = "TAYRONA_DATA_DIR", help = "Directory for pos.db, config.json and logs")]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in against the backend.
    Login {
        #[arg(long)]
        usuario: String,
        /// Read the password from this environment variable instead of stdin.
        #[arg(long, default_value = "TAYRONA_PASSWORD")]
        password_env: String,
    },
    Logout,
    Whoami,
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },
    Dashboard {
        #[arg(long, default_value_t = false)]
        watch: bool,
        /// Poll interval in seconds (defaults to the configured one).
        #[arg(long)]
        interval: Option<u64>,
    },
    Caja {
        #[command(subcommand)]
        command: CajaCommands,
    },
    Turnos {
        #[command(subcommand)]
        command: TurnosCommands,
    },
    Inventario {
        #[command(subcommand)]
        command: InventarioCommands,
    },
    Ventas {
        #[command(subcommand)]
        command: VentasCommands,
    },
    /// Ring up a sale.
    Vender(VenderArgs),
    Analisis {
        #[command(flatten)]
        rango: RangeArgs,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    Pin {
        #[command(subcommand)]
        command: PinCommands,
    },
    Exportar {
        #[command(subcommand)]
        command: ExportCommands,
    },
    /// Print the last ticket (sale or turno close).
    Ticket {
        #[arg(long, value_enum, default_value_t = TicketFormat::Texto)]
        formato: TicketFormat,
        #[arg(long)]
        salida: Option<PathBuf>,
        /// Ticket width in mm (58 or 80); defaults to the store setting.
        #[arg(long)]
        ancho: Option<u32>,
    },
    Diagnostico,
}

#[derive(Subcommand, Debug)]
pub enum DeviceCommands {
    Status,
    Request {
        #[arg(long)]
        nombre: Option<String>,
    },
    List,
    Approve { id: String },
    Reject { id: String },
    Revoke { id: String },
}

#[derive(Subcommand, Debug)]
pub enum CajaCommands {
    Abrir {
        #[arg(value_parser = parse_amount)]
        monto: f64,
    },
    Cerrar {
        /// Counted cash; omit when `--billetes` is given.
        #[arg(value_parser = parse_amount)]
        contado: Option<f64>,
        /// Denomination count, e.g. `20000x3,1000x5,100x12`.
        #[arg(long)]
        billetes: Option<String>,
        #[arg(long)]
        nota: Option<String>,
    },
    Movimiento {
        #[arg(value_enum)]
        tipo: MovementKind,
        #[arg(value_parser = parse_amount)]
        monto: f64,
        #[arg(long)]
        motivo: String,
    },
    /// Compare the drawer against the expected cash without closing.
    Arqueo {
        #[arg(value_parser = parse_amount)]
        contado: Option<f64>,
        #[arg(long)]
        billetes: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum MovementKind {
    Ingreso,
    Egreso,
    Retiro,
}

#[derive(Subcommand, Debug)]
pub enum TurnosCommands {
    Historial {
        #[command(flatten)]
        rango: RangeArgs,
        /// Print the running ledger as well.
        #[arg(long, default_value_t = false)]
        detalle: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum InventarioCommands {
    Abc,
    Reponer {
        /// Days of sales the reorder should cover.
        #[arg(long, default_value_t = crate::inventory::DEFAULT_COVER_DAYS)]
        dias: u32,
    },
    Resumen,
    Buscar {
        texto: Option<String>,
        #[arg(long)]
        categoria: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum VentasCommands {
    Reporte {
        #[command(flatten)]
        rango: RangeArgs,
        #[arg(long, default_value_t = crate::sales::DEFAULT_TOP_PRODUCTS)]
        top: usize,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RangeArgs {
    /// hoy, ayer, 7d, mes, mes-anterior
    #[arg(long, default_value = "hoy")]
    pub rango: String,
    #[arg(long, value_parser = parse_date)]
    pub desde: Option<chrono::NaiveDate>,
    #[arg(long, value_parser = parse_date)]
    pub hasta: Option<chrono::NaiveDate>,
}

#[derive(Args, Debug)]
pub struct VenderArgs {
    /// Product code or id, optionally with quantity: `7790001x2`.
    #[arg(long = "item", required = true)]
    pub items: Vec<String>,
    /// Global discount: `10%` or a fixed amount.
    #[arg(long)]
    pub descuento: Option<String>,
    #[arg(long, default_value = "efectivo")]
    pub pago: String,
    /// Cash received, for change.
    #[arg(long, value_parser = parse_amount)]
    pub recibido: Option<f64>,
    /// Split payment, repeatable: `tarjeta:5000`.
    #[arg(long = "dividir")]
    pub split: Vec<String>,
    /// Supervisor PIN, when the discount needs one.
    #[arg(long, env = "TAYRONA_SUPERVISOR_PIN", hide_env_values = true)]
    pub pin: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    Ver,
    /// Set the local daily sales goal (0 clears it).
    Meta {
        #[arg(value_parser = parse_amount)]
        monto: f64,
    },
    /// Change one store setting on the backend.
    Set { clave: String, valor: String },
    /// Point the terminal at another API base URL.
    Api { url: String },
}

#[derive(Subcommand, Debug)]
pub enum PinCommands {
    Set {
        #[arg(env = "TAYRONA_NEW_PIN", hide_env_values = true)]
        pin: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ExportCommands {
    Ventas {
        #[command(flatten)]
        rango: RangeArgs,
        #[arg(long)]
        salida: PathBuf,
    },
    Inventario {
        #[arg(long)]
        salida: PathBuf,
    },
    Turnos {
        #[command(flatten)]
        rango: RangeArgs,
        #[arg(long)]
        salida: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TicketFormat {
    Texto,
    Html,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_accept_local_format() {
        let cli = Cli::try_parse_from(["tayrona", "caja", "abrir", "1.500,50"]).unwrap();
        match cli.command {
            Commands::Caja {
                command: CajaCommands::Abrir { monto },
            } => assert_eq!(monto, 1500.5),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["tayrona", "caja", "abrir", "mil"]).is_err());
    }

    #[test]
    fn sale_items_and_split_payments() {
        let cli = Cli::try_parse_from([
            "tayrona", "vender", "--item", "779x2", "--item", "12", "--descuento", "10%",
            "--dividir", "efectivo:1000", "--dividir", "tarjeta:500",
        ])
        .unwrap();
        let Commands::Vender(args) = cli.command else {
            panic!("expected vender");
        };
        assert_eq!(args.items, vec!["779x2", "12"]);
        assert_eq!(args.descuento.as_deref(), Some("10%"));
        assert_eq!(args.split.len(), 2);
        assert_eq!(args.pago, "efectivo");
    }

    #[test]
    fn range_arguments() {
        let cli = Cli::try_parse_from([
            "tayrona", "ventas", "reporte", "--desde", "2024-05-01", "--hasta", "2024-05-10",
        ])
        .unwrap();
        let Commands::Ventas {
            command: VentasCommands::Reporte { rango, top },
        } = cli.command
        else {
            panic!("expected ventas reporte");
        };
        assert_eq!(top, crate::sales::DEFAULT_TOP_PRODUCTS);
        assert_eq!(rango.rango, "hoy");
        assert_eq!(rango.desde.map(|d| d.to_string()).as_deref(), Some("2024-05-01"));
        assert!(Cli::try_parse_from(["tayrona", "ventas", "reporte", "--desde", "ayer"]).is_err());
    }
}
