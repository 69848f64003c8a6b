//! HTTP emitter for publishing from other backend processes
//!
//! Sends ChangeEvents to a running instance via `POST /internal/events`.
//! Fire-and-forget: errors are logged but never block the caller.

use super::types::{ChangeEvent, EventEmitter};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::warn;

/// Forwards ChangeEvents to the notification server's `/internal/events` endpoint.
///
/// Used by the CRM write path when it runs in a separate process from the
/// stream server. Each `emit` spawns a request on the current tokio runtime.
#[derive(Clone)]
pub struct HttpEmitter {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpEmitter {
    /// Create an emitter targeting the given server root (e.g. "http://localhost:8080")
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        let url = format!("{}/internal/events", base_url.trim_end_matches('/'));

        Ok(Self { client, url, token })
    }

    /// Send one event and wait for the server to accept it.
    ///
    /// `emit` wraps this in a background task; the CLI calls it directly so
    /// it can report the outcome.
    pub async fn send(&self, event: &ChangeEvent) -> Result<()> {
        let mut request = self.client.post(&self.url).json(event);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.url))?
            .error_for_status()
            .context("Event rejected by server")?;

        Ok(())
    }
}

impl EventEmitter for HttpEmitter {
    fn emit(&self, event: ChangeEvent) {
        let emitter = self.clone();

        tokio::spawn(async move {
            if let Err(e) = emitter.send(&event).await {
                warn!(
                    url = %emitter.url,
                    entity = %event.entity_kind(),
                    change = ?event.change_kind(),
                    "Failed to forward event: {:#}",
                    e
                );
            }
        });
    }
}
