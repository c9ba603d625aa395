//! Session configuration, immutable per attempt.

use std::time::Duration;

use relais_proto::TunnelProtocol;
use tracing::warn;

/// Default and fallback establishment timeout.
pub const DEFAULT_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Valid establishment-timeout range in seconds.
pub const ESTABLISH_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=300;

/// Default tunnel health-check cadence.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for one tunnel. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Host the local service listens on.
    pub local_host: String,
    /// Port the local service listens on.
    pub local_port: u16,
    /// Relay address as `host:port`.
    pub relay_addr: String,
    /// Kind of tunnel to request.
    pub protocol: TunnelProtocol,
    /// Custom domain to request, if any.
    pub domain: Option<String>,
    /// Specific remote port to request, if any.
    pub remote_port: Option<u16>,
    /// Auth token presented in the tunnel request.
    pub token: Option<String>,
    /// Bound on the whole DIALING→RUNNING segment.
    pub establish_timeout: Duration,
    /// Whether the relay and tunnel reachability probes run.
    pub health_check: bool,
    /// Cadence of the tunnel reachability probe.
    pub health_check_interval: Duration,
    /// Whether the control channel is encrypted. Disabled only for old
    /// relays that speak line-terminated JSON.
    pub encryption: bool,
}

impl SessionConfig {
    pub fn new(local_port: u16, relay_addr: impl Into<String>) -> Self {
        Self {
            local_host: "localhost".to_string(),
            local_port,
            relay_addr: relay_addr.into(),
            protocol: TunnelProtocol::Http,
            domain: None,
            remote_port: None,
            token: None,
            establish_timeout: DEFAULT_ESTABLISH_TIMEOUT,
            health_check: true,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            encryption: true,
        }
    }

    pub fn with_local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    pub fn with_protocol(mut self, protocol: TunnelProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_remote_port(mut self, port: Option<u16>) -> Self {
        self.remote_port = port;
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Set the establishment timeout, falling back to the default when the
    /// value is outside the valid range.
    pub fn with_establish_timeout_secs(mut self, secs: u64) -> Self {
        if ESTABLISH_TIMEOUT_RANGE.contains(&secs) {
            self.establish_timeout = Duration::from_secs(secs);
        } else {
            warn!(
                requested = secs,
                default = DEFAULT_ESTABLISH_TIMEOUT.as_secs(),
                "establishment timeout out of range (1-300s), using default"
            );
            self.establish_timeout = DEFAULT_ESTABLISH_TIMEOUT;
        }
        self
    }

    pub fn with_health_check(mut self, enabled: bool) -> Self {
        self.health_check = enabled;
        self
    }

    /// Set the health-check cadence; values under one second are raised
    /// to one second.
    pub fn with_health_check_interval_secs(mut self, secs: u64) -> Self {
        self.health_check_interval = Duration::from_secs(secs.max(1));
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encryption = enabled;
        self
    }

    /// The local service address as `host:port`.
    pub fn local_addr(&self) -> String {
        format!("{}:{}", self.local_host, self.local_port)
    }
}
