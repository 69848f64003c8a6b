//! Arts-center CRM change notifications
//!
//! Pushes data-change events to connected browser clients over
//! Server-Sent Events:
//! - `events`: typed change events and the in-process fan-out bus
//! - `gateway`: per-client streams with heartbeats and connection accounting
//! - `api`: axum routes (SSE stream, diagnostics, internal ingest)
//! - `auth`: JWT validation shared with the CRM backend

pub mod api;
pub mod auth;
pub mod events;
pub mod gateway;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::{Context, Result};
use gateway::{GatewayConfig, NotificationGateway};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub streams: StreamsYamlConfig,
    /// Auth section: if absent, the service runs in no-auth mode
    pub auth: Option<AuthConfig>,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub port: u16,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// SSE stream tuning section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamsYamlConfig {
    pub heartbeat_interval_secs: u64,
    pub diagnostics_interval_secs: u64,
    pub connection_warning_threshold: u64,
    pub subscriber_queue_capacity: usize,
    pub outbound_buffer: usize,
}

impl Default for StreamsYamlConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            diagnostics_interval_secs: 30,
            connection_warning_threshold: 50,
            subscriber_queue_capacity: events::DEFAULT_CAPACITY,
            outbound_buffer: 64,
        }
    }
}

/// Authentication configuration (JWT shared with the CRM backend)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// JWT signing secret (HS256, minimum 32 characters)
    pub jwt_secret: String,
    /// Optional domain restriction (e.g. "artcenter.org")
    pub allowed_email_domain: Option<String>,
    /// Frontend URL for CORS (e.g. "http://localhost:3000")
    pub frontend_url: Option<String>,
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub heartbeat_interval_secs: u64,
    pub diagnostics_interval_secs: u64,
    pub connection_warning_threshold: u64,
    pub subscriber_queue_capacity: usize,
    pub outbound_buffer: usize,
    /// Auth config: None means no-auth mode
    pub auth_config: Option<AuthConfig>,
}

/// Env var value parsed as `T`, or `fallback` if unset or unparseable
fn env_or<T: FromStr>(name: &str, fallback: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {:?}", name, raw);
            fallback
        }),
        Err(_) => fallback,
    }
}

impl Config {
    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);
        let streams = yaml.streams;

        let config = Self {
            server_port: env_or("SERVER_PORT", yaml.server.port),
            heartbeat_interval_secs: env_or(
                "HEARTBEAT_INTERVAL_SECS",
                streams.heartbeat_interval_secs,
            ),
            diagnostics_interval_secs: env_or(
                "DIAGNOSTICS_INTERVAL_SECS",
                streams.diagnostics_interval_secs,
            ),
            connection_warning_threshold: env_or(
                "CONNECTION_WARNING_THRESHOLD",
                streams.connection_warning_threshold,
            ),
            subscriber_queue_capacity: env_or(
                "SUBSCRIBER_QUEUE_CAPACITY",
                streams.subscriber_queue_capacity,
            ),
            outbound_buffer: env_or("OUTBOUND_BUFFER", streams.outbound_buffer),
            auth_config: yaml.auth,
        };

        if let Some(ref auth) = config.auth_config {
            anyhow::ensure!(
                auth.jwt_secret.len() >= 32,
                "auth.jwt_secret must be at least 32 characters"
            );
        }

        Ok(config)
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }

    /// Gateway tuning derived from this config; zero periods become one second
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            diagnostics_interval: Duration::from_secs(self.diagnostics_interval_secs.max(1)),
            warning_threshold: self.connection_warning_threshold,
            subscriber_queue_capacity: self.subscriber_queue_capacity.max(1),
            outbound_buffer: self.outbound_buffer.max(1),
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Run the HTTP server until SIGINT/SIGTERM.
///
/// On signal the gateway is shut down first so that open SSE bodies end;
/// axum then drains the remaining in-flight requests.
pub async fn start_server(config: Config) -> Result<()> {
    if config.auth_config.is_none() {
        tracing::warn!("No auth section configured, running in no-auth mode");
    }

    let gateway = Arc::new(NotificationGateway::new(config.gateway_config()));
    let state = Arc::new(api::handlers::ServerState::new(
        gateway.clone(),
        config.auth_config.clone(),
    ));
    let app = api::create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Notification server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown::shutdown_signal().await;
            gateway.shutdown();
        })
        .await
        .context("HTTP server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
