//! MilkBank CLI - Main entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use milkbank_core::AppointmentType;
use milkbank_rpc::{commands, create_router, AppConfig, AppContext};

#[derive(Parser)]
#[command(name = "milkbank")]
#[command(about = "MilkBank - donor lifecycle core", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve,

    /// Create the schema and seed default resources and gifts
    Init,

    /// Register a new donor
    RegisterDonor {
        /// Full name
        name: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },

    /// Add a bookable staff member or station
    AddResource {
        /// Resource ID (e.g. donation-station-3)
        id: String,
        /// Display name
        name: String,
        /// Appointment type served: screening or donation
        #[arg(long = "type", value_parser = parse_appointment_type)]
        kind: AppointmentType,
    },

    /// Add a gift to the catalog
    AddGift {
        name: String,
        /// Cost in reward points
        #[arg(long)]
        cost: i64,
        #[arg(long, default_value = "0")]
        stock: i64,
    },

    /// Abandon inactive donors and expire overdue signing challenges
    Sweep,

    /// Print the effective permission policy
    Policy,
}

fn parse_appointment_type(raw: &str) -> Result<AppointmentType, String> {
    raw.parse()
        .map_err(|_| format!("unknown appointment type '{}'", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    // Create application context
    let ctx = AppContext::new(&config).await?;

    match cli.command {
        Commands::Serve => {
            let addr: SocketAddr = config.bind_address().parse()?;
            let app = create_router(Arc::new(ctx));

            tracing::info!("🚀 MilkBank API listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }

        Commands::Init => {
            commands::init(&ctx).await?;
        }

        Commands::RegisterDonor { name, phone, email } => {
            commands::register_donor(&ctx, &name, phone, email).await?;
        }

        Commands::AddResource { id, name, kind } => {
            commands::add_resource(&ctx, &id, &name, kind).await?;
        }

        Commands::AddGift { name, cost, stock } => {
            commands::add_gift(&ctx, &name, cost, stock).await?;
        }

        Commands::Sweep => {
            commands::sweep(&ctx).await?;
        }

        Commands::Policy => {
            commands::policy(&ctx)?;
        }
    }

    Ok(())
}
