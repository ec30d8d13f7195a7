mod commands;
mod config;
mod poll;
mod runtime;
mod server;
mod telegram;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{cmd_ammonia, cmd_chat, cmd_history, cmd_species_list, cmd_species_show};
use crate::config::Config;
use crate::runtime::BotRuntime;
use crate::telegram::TelegramClient;
use aquakeeper_core::service::AquaService;

#[derive(Parser)]
#[command(
    name = "aquakeeper",
    version,
    about = "Aquarium water-quality bot for Telegram",
    long_about = "Logs water tests per aquarium, converts total ammonia into free NH3 and \
                  NH4+, and checks fish and plants against the latest test."
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram webhook server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1; put a TLS proxy in front for Telegram)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Accept webhook calls without the secret token (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
    /// Run the bot by long-polling Telegram (no public URL needed)
    Poll,
    /// Talk to the bot from the terminal
    Chat {
        /// User id to act as
        #[arg(short, long, default_value = "1")]
        user: i64,
    },
    /// Split total ammonia into free NH3 and NH4+
    #[command(allow_negative_numbers = true)]
    Ammonia {
        /// pH of the water
        ph: f64,
        /// Water temperature in °C
        temperature_c: f64,
        /// Total ammonia (NH3 + NH4+) in mg/L
        tan: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Browse the species reference table
    Species {
        #[command(subcommand)]
        command: SpeciesCommands,
    },
    /// Show all water tests of an aquarium
    History {
        /// Aquarium ID
        aquarium_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Write the tests to a CSV file instead of printing them
        #[arg(long, value_name = "PATH")]
        csv: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SpeciesCommands {
    /// List known species
    List {
        /// Only this kind: fish or plant
        #[arg(short, long)]
        kind: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show tolerances of one species
    Show {
        /// Common name or alias
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "aquakeeper=info,aquakeeper_core=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn open_service(config: &Config) -> Result<AquaService> {
    AquaService::new(
        &config.db_path,
        config.species_table()?,
        config.service_settings(),
    )
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let client = Arc::new(TelegramClient::new(config.telegram_token()?)?);
            let secret = if no_auth {
                None
            } else {
                Some(config.load_or_create_webhook_secret()?)
            };
            if let Some(ref public_url) = config.public_url {
                let url = format!("{}/webhook", public_url.trim_end_matches('/'));
                client
                    .set_webhook(&url, secret.as_deref())
                    .await
                    .context("Failed to register the webhook with Telegram")?;
                info!(url = url.as_str(), "webhook registered");
            } else {
                warn!("public_url is not configured; the webhook must be registered manually");
            }
            let runtime = Arc::new(BotRuntime::new(open_service(&config)?, client));
            runtime.spawn_evictor(config.session_ttl());
            server::start_server(runtime, port, &bind, secret).await
        }
        Commands::Poll => {
            let client = Arc::new(TelegramClient::new(config.telegram_token()?)?);
            let runtime = Arc::new(BotRuntime::new(open_service(&config)?, client.clone()));
            runtime.spawn_evictor(config.session_ttl());
            poll::run_polling(&client, runtime).await
        }
        Commands::Chat { user } => cmd_chat(&open_service(&config)?, user),
        Commands::Ammonia {
            ph,
            temperature_c,
            tan,
            json,
        } => cmd_ammonia(ph, temperature_c, tan, config.nh3_warning_mg_l, json),
        Commands::Species { command } => {
            let table = config.species_table()?;
            match command {
                SpeciesCommands::List { kind, json } => {
                    cmd_species_list(&table, kind.as_deref(), json)
                }
                SpeciesCommands::Show { name, json } => cmd_species_show(&table, &name, json),
            }
        }
        Commands::History {
            aquarium_id,
            json,
            csv,
        } => cmd_history(&open_service(&config)?, aquarium_id, json, csv.as_deref()),
    }
}
