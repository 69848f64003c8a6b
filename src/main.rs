//! Arts-center CRM change notifications - Main Server
//!
//! Serves real-time data-change events to CRM clients over SSE.

use anyhow::{Context, Result};
use arts_crm_events::events::{ChangeEvent, ChangeKind, EntityKind, HttpEmitter};
use arts_crm_events::Config;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "arts-crm-events")]
#[command(about = "Real-time change notification server for the arts-center CRM")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChangeArg {
    Created,
    Updated,
    Deleted,
}

impl From<ChangeArg> for ChangeKind {
    fn from(arg: ChangeArg) -> Self {
        match arg {
            ChangeArg::Created => ChangeKind::Created,
            ChangeArg::Updated => ChangeKind::Updated,
            ChangeArg::Deleted => ChangeKind::Deleted,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the notification server
    Serve {
        /// Port to listen on (overrides config.yaml and SERVER_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Path to the YAML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Publish a single change event to a running server
    Emit {
        /// Server root URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Bearer token for the server
        #[arg(long, env = "EVENTS_TOKEN")]
        token: Option<String>,

        /// Kind of change
        #[arg(value_enum)]
        change: ChangeArg,

        /// Entity kind (e.g. Attendance, medical_certificate)
        entity: String,

        /// Entity id
        id: String,

        /// JSON payload (required for created/updated)
        #[arg(long)]
        data: Option<String>,

        /// Id of the user who made the change
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,arts_crm_events=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => {
            let mut config = Config::from_yaml_and_env(config.as_deref())?;
            if let Some(port) = port {
                config.server_port = port;
            }
            arts_crm_events::start_server(config).await
        }
        Commands::Emit {
            url,
            token,
            change,
            entity,
            id,
            data,
            user,
        } => run_emit(&url, token, change.into(), &entity, id, data, user).await,
    }
}

async fn run_emit(
    url: &str,
    token: Option<String>,
    change: ChangeKind,
    entity: &str,
    id: String,
    data: Option<String>,
    user: Option<String>,
) -> Result<()> {
    let entity: EntityKind = entity.parse()?;
    let payload = data
        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
        .transpose()
        .context("--data is not valid JSON")?;

    let event = ChangeEvent::from_parts(change, entity, id, payload)?.with_actor(user);

    let emitter = HttpEmitter::new(url, token)?;
    emitter.send(&event).await?;

    tracing::info!(
        "Published {:?} {} {} to {}",
        event.change_kind(),
        event.entity_kind(),
        event.entity_id(),
        url
    );
    Ok(())
}
