//! Test helper factories and state builders
//!
//! Provides gateway configs with short timers, stream readers with
//! deadlines, and mock `ServerState` instances for handler tests.
#![allow(dead_code)]

use crate::api::handlers::{NotificationState, ServerState};
use crate::events::ChangeEvent;
use crate::gateway::{EventStream, GatewayConfig, NotificationGateway, OutboundFrame};
use crate::AuthConfig;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const TEST_SECRET: &str = "test-secret-key-minimum-32-chars!!";

// ============================================================================
// State builders
// ============================================================================

/// Gateway config with timers short enough for tests
pub fn fast_gateway_config() -> GatewayConfig {
    GatewayConfig {
        heartbeat_interval: Duration::from_millis(100),
        diagnostics_interval: Duration::from_millis(50),
        warning_threshold: 50,
        subscriber_queue_capacity: 1024,
        outbound_buffer: 64,
    }
}

pub fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: TEST_SECRET.to_string(),
        allowed_email_domain: None,
        frontend_url: None,
    }
}

/// Server state over a fresh gateway with default (slow) timers
pub fn test_state(auth_config: Option<AuthConfig>) -> NotificationState {
    Arc::new(ServerState::new(
        Arc::new(NotificationGateway::default()),
        auth_config,
    ))
}

/// Sign a token the way the CRM backend does; negative `ttl_secs` gives an
/// already expired one
pub fn mint_token(sub: &str, email: Option<&str>, ttl_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "sub": sub,
        "email": email,
        "iat": now,
        "exp": now + ttl_secs,
    });
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("sign test token")
}

// ============================================================================
// Stream readers
// ============================================================================

/// Next frame of any kind, or `None` on timeout or end of stream
pub async fn next_frame(stream: &mut EventStream, wait: Duration) -> Option<OutboundFrame> {
    tokio::time::timeout(wait, stream.next()).await.ok().flatten()
}

/// Next change event, skipping heartbeats, or `None` once `wait` has elapsed
pub async fn next_change(stream: &mut EventStream, wait: Duration) -> Option<ChangeEvent> {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match next_frame(stream, remaining).await? {
            OutboundFrame::DataChange(event) => return Some(event),
            OutboundFrame::Heartbeat { .. } => continue,
        }
    }
}
