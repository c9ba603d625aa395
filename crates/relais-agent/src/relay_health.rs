//! Relay reachability probe.
//!
//! Polls the relay's HTTPS health endpoint every 5 s. When the relay has
//! been unreachable for a full 30 s window the probe requests exactly one
//! session tear-down; the supervisor then blocks in
//! [`wait_until_healthy`] until the relay answers again and reconnects
//! without backoff.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::error::AgentError;

/// Relay health endpoint.
pub const HEALTH_URL: &str = "https://relais.dev/api/health";

/// Probe cadence.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(5);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const FAILURE_WINDOW: Duration = Duration::from_secs(30);

/// HTTP client shared by the health probes.
pub fn probe_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// One probe round. Healthy iff the endpoint answers 200 with a JSON body
/// whose `code` is 200 and whose message mentions "healthy".
pub async fn relay_is_healthy(client: &reqwest::Client) -> bool {
    let response = match client.get(HEALTH_URL).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(error = %e, "relay health request failed");
            return false;
        }
    };
    if response.status() != reqwest::StatusCode::OK {
        debug!(status = %response.status(), "relay health returned non-200");
        return false;
    }
    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(_) => return false,
    };
    body.get("code").and_then(|c| c.as_i64()) == Some(200)
        && body
            .get("message")
            .and_then(|m| m.as_str())
            .is_some_and(|m| m.contains("healthy"))
}

/// Probe loop attached to a live session. Sends at most one teardown.
pub async fn run_probe(client: reqwest::Client, teardown: mpsc::Sender<AgentError>) {
    let mut down_since: Option<Instant> = None;
    let mut lost_reported = false;
    loop {
        if relay_is_healthy(&client).await {
            if lost_reported {
                info!("✅ Serveur de relais à nouveau accessible");
            }
            down_since = None;
            lost_reported = false;
        } else {
            let since = *down_since.get_or_insert_with(Instant::now);
            if !lost_reported && since.elapsed() >= FAILURE_WINDOW {
                error!("🚨 Serveur inaccessible");
                lost_reported = true;
                let _ = teardown.send(AgentError::HealthMonitorTriggered).await;
            }
        }
        sleep(PROBE_INTERVAL).await;
    }
}

/// Block until the relay reports healthy again. Used by the supervisor's
/// waiting-for-recovery state; reconnection is immediate on the first
/// healthy response.
pub async fn wait_until_healthy(client: &reqwest::Client) {
    info!("waiting for the relay to come back");
    loop {
        if relay_is_healthy(client).await {
            info!("✅ Relais de nouveau accessible, reconnexion immédiate");
            return;
        }
        sleep(PROBE_INTERVAL).await;
    }
}
