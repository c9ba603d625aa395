//! Tunnel reachability probe.
//!
//! Two independent checks per cycle while a session is up:
//!
//! - **Local liveness**: can the user's service still be reached? Three
//!   consecutive failures log a warning but never tear the session down;
//!   the local process may just be restarting.
//! - **End-to-end liveness**: does traffic entering the public address
//!   still come back through the tunnel? Three consecutive failures mean
//!   the tunnel is silently broken; if the relay itself is reachable the
//!   probe requests a reconnect, otherwise it keeps polling until either
//!   the tunnel recovers on its own or the relay comes back.

use std::time::Duration;

use relais_proto::TunnelProtocol;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::AgentError;
use crate::relay_health;

const LOCAL_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLIC_TIMEOUT: Duration = Duration::from_secs(10);
const FAILURE_STRIKES: u32 = 3;

/// Header marking probe requests so user handlers can ignore them. Any
/// status code in response counts as success: it means the request made
/// it through the tunnel and back.
pub const HEALTH_CHECK_HEADER: &str = "X-Relais-Health-Check";

pub struct TunnelProbe {
    config: SessionConfig,
    public_addr: String,
    client: reqwest::Client,
    local_failures: u32,
    local_down: bool,
    public_failures: u32,
}

impl TunnelProbe {
    pub fn new(config: SessionConfig, public_addr: String, client: reqwest::Client) -> Self {
        Self {
            config,
            public_addr,
            client,
            local_failures: 0,
            local_down: false,
            public_failures: 0,
        }
    }

    async fn local_alive(&self) -> bool {
        timeout(LOCAL_TIMEOUT, TcpStream::connect(self.config.local_addr()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn public_alive(&self) -> bool {
        match self.config.protocol {
            TunnelProtocol::Http => {
                let url = public_url(&self.public_addr);
                match self
                    .client
                    .get(&url)
                    .header(HEALTH_CHECK_HEADER, "true")
                    .timeout(PUBLIC_TIMEOUT)
                    .send()
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        debug!(url = %url, error = %e, "public URL check failed");
                        false
                    }
                }
            }
            TunnelProtocol::Tcp => {
                timeout(PUBLIC_TIMEOUT, TcpStream::connect(&self.public_addr))
                    .await
                    .map(|r| r.is_ok())
                    .unwrap_or(false)
            }
        }
    }

    /// Probe loop attached to a live session. Sends at most one teardown.
    pub async fn run(mut self, teardown: mpsc::Sender<AgentError>) {
        loop {
            sleep(self.config.health_check_interval).await;

            if self.local_alive().await {
                if self.local_down {
                    info!(
                        "✅ Port local {} de nouveau accessible",
                        self.config.local_addr()
                    );
                    self.local_down = false;
                }
                self.local_failures = 0;
            } else {
                self.local_failures += 1;
                debug!(
                    failures = self.local_failures,
                    "local port check failed"
                );
                if self.local_failures >= FAILURE_STRIKES && !self.local_down {
                    warn!("⚠️ Port local {} inaccessible", self.config.local_addr());
                    self.local_down = true;
                }
                // The end-to-end check is meaningless right after a local
                // failure; skip it this cycle.
                continue;
            }

            if self.public_alive().await {
                self.public_failures = 0;
                continue;
            }
            self.public_failures += 1;
            debug!(
                failures = self.public_failures,
                public_addr = %self.public_addr,
                "end-to-end check failed"
            );
            if self.public_failures < FAILURE_STRIKES {
                continue;
            }

            warn!(public_addr = %self.public_addr, "tunnel unreachable end to end");
            if relay_health::relay_is_healthy(&self.client).await {
                let _ = teardown.send(AgentError::TunnelHealthTriggered).await;
                return;
            }

            // Relay is down too: reconnecting now would fail. Hold here
            // until the tunnel recovers on its own or the relay returns.
            info!("relay unreachable as well, waiting for recovery");
            loop {
                sleep(relay_health::PROBE_INTERVAL).await;
                if self.public_alive().await {
                    info!("✅ Tunnel de nouveau accessible");
                    self.public_failures = 0;
                    break;
                }
                if relay_health::relay_is_healthy(&self.client).await {
                    let _ = teardown.send(AgentError::TunnelHealthTriggered).await;
                    return;
                }
            }
        }
    }
}

/// Browser-facing URL for a public address: port 443 reads as plain HTTPS.
fn public_url(public_addr: &str) -> String {
    match public_addr.strip_suffix(":443") {
        Some(host) => format!("https://{host}"),
        None => format!("http://{public_addr}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_hides_the_default_https_port() {
        assert_eq!(public_url("demo.relais.dev:443"), "https://demo.relais.dev");
        assert_eq!(public_url("demo.relais.dev:8080"), "http://demo.relais.dev:8080");
    }

    #[tokio::test]
    async fn local_probe_sees_a_live_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = SessionConfig::new(addr.port(), "relay:7000").with_local_host("127.0.0.1");
        let probe = TunnelProbe::new(config, "x:1".to_string(), relay_health::probe_client());
        assert!(probe.local_alive().await);
    }

    #[tokio::test]
    async fn local_probe_sees_a_dead_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = SessionConfig::new(addr.port(), "relay:7000").with_local_host("127.0.0.1");
        let probe = TunnelProbe::new(config, "x:1".to_string(), relay_health::probe_client());
        assert!(!probe.local_alive().await);
    }

    #[tokio::test]
    async fn tcp_public_probe_connects_to_public_addr() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = SessionConfig::new(1, "relay:7000").with_protocol(TunnelProtocol::Tcp);
        let probe = TunnelProbe::new(config, addr.to_string(), relay_health::probe_client());
        assert!(probe.public_alive().await);
    }
}
