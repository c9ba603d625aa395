//! Control session: one connection attempt against the relay.
//!
//! ```text
//! INIT → DIALING → HANDSHAKING → REQUESTING → RUNNING → TEARDOWN
//!    \___________________________________________________/
//!                 any failure jumps to TEARDOWN
//! ```
//!
//! The whole DIALING→RUNNING segment is bounded by the configured
//! establishment timeout. Once RUNNING, the decode loop is the exclusive
//! reader of the control stream; the watchdog and health probes interact
//! with it only through the teardown channel.

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use relais_crypto::{KeyExchange, SecureChannel};
use relais_proto::codec::{self, FrameReader};
use relais_proto::{Command, Status, TunnelProtocol, TunnelResponse};

use crate::config::SessionConfig;
use crate::error::AgentError;
use crate::heartbeat::{self, HeartbeatState};
use crate::net;
use crate::relay_health;
use crate::splice;
use crate::tunnel_health::TunnelProbe;

/// Inbound inactivity bound on the control socket.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(180);

/// Result of one session attempt.
pub struct SessionOutcome {
    /// True when the session reached RUNNING. The supervisor resets the
    /// failure tracker on it.
    pub established: bool,
    /// The error that ended the session.
    pub error: AgentError,
}

/// Framing in effect after establishment. A secure-but-unkeyed state is
/// unrepresentable: encrypting requires the derived channel value.
enum Framing {
    Secure(SecureChannel),
    Plaintext,
}

struct ControlChannel {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    framing: Framing,
}

impl ControlChannel {
    async fn send(&mut self, value: &serde_json::Value) -> Result<(), AgentError> {
        let Self {
            writer, framing, ..
        } = self;
        let frame = match framing {
            Framing::Secure(channel) => {
                let plaintext = serde_json::to_vec(value)
                    .map_err(|e| AgentError::Protocol(e.to_string()))?;
                codec::encode_record(&channel.seal(&plaintext)?)?
            }
            Framing::Plaintext => codec::encode_line(value)?,
        };
        writer.write_all(&frame).await.map_err(AgentError::Network)
    }

    async fn recv(&mut self) -> Result<serde_json::Value, AgentError> {
        let Self {
            reader, framing, ..
        } = self;
        match framing {
            Framing::Secure(channel) => {
                let record = reader.read_record().await?;
                let plaintext = channel.open(&record)?;
                serde_json::from_slice(&plaintext)
                    .map_err(|e| AgentError::Protocol(e.to_string()))
            }
            Framing::Plaintext => Ok(reader.read_line().await?),
        }
    }
}

/// Run one complete session attempt. Returns when the session has ended;
/// retry policy belongs to the supervisor.
pub async fn run_session(config: &SessionConfig) -> SessionOutcome {
    match establish(config).await {
        Ok((channel, public_addr)) => {
            let error = run_established(config, channel, public_addr).await;
            SessionOutcome {
                established: true,
                error,
            }
        }
        Err(error) => SessionOutcome {
            established: false,
            error,
        },
    }
}

async fn establish(config: &SessionConfig) -> Result<(ControlChannel, String), AgentError> {
    match timeout(config.establish_timeout, establish_inner(config)).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::EstablishTimeout),
    }
}

async fn establish_inner(
    config: &SessionConfig,
) -> Result<(ControlChannel, String), AgentError> {
    info!(relay = %config.relay_addr, "connecting to relay");
    let stream = net::connect_relay(&config.relay_addr).await?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = write_half;

    let framing = if config.encryption {
        // Binary-framed handshake: base64 inside a length envelope
        // survives DPI proxies that drop raw JSON on mobile paths.
        let keys = KeyExchange::generate();
        let init = serde_json::to_value(Command::SecureInit {
            client_public_key: keys.public_key_base64(),
        })
        .map_err(|e| AgentError::Protocol(e.to_string()))?;
        writer
            .write_all(&codec::encode_handshake(&init)?)
            .await
            .map_err(AgentError::Network)?;
        debug!("sent SECURE_INIT");

        let reply = reader.read_handshake().await?;
        let ack: Command = serde_json::from_value(reply)
            .map_err(|e| AgentError::Protocol(format!("invalid handshake reply: {e}")))?;
        let Command::SecureAck {
            status,
            server_public_key,
            error,
        } = ack
        else {
            return Err(AgentError::Protocol(
                "expected SECURE_ACK in reply to SECURE_INIT".to_string(),
            ));
        };
        if status != Status::Ok {
            return Err(AgentError::Server(
                error.unwrap_or_else(|| "handshake rejected".to_string()),
            ));
        }
        let server_key = server_public_key.ok_or_else(|| {
            AgentError::Protocol("SECURE_ACK carried no server_public_key".to_string())
        })?;
        let channel = keys.into_channel(&server_key)?;
        debug!("secure channel established");
        Framing::Secure(channel)
    } else {
        Framing::Plaintext
    };

    let mut channel = ControlChannel {
        reader,
        writer,
        framing,
    };

    let request = serde_json::to_value(Command::Tunnel {
        local_port: config.local_port.to_string(),
        domain: config.domain.clone().unwrap_or_default(),
        remote_port: config
            .remote_port
            .map(|p| p.to_string())
            .unwrap_or_default(),
        token: config.token.clone().unwrap_or_default(),
        protocol: config.protocol,
    })
    .map_err(|e| AgentError::Protocol(e.to_string()))?;
    channel.send(&request).await?;
    debug!("sent TUNNEL request");

    let reply = channel.recv().await?;
    let response: TunnelResponse = serde_json::from_value(reply)
        .map_err(|e| AgentError::Protocol(format!("invalid TUNNEL reply: {e}")))?;
    match response.status {
        Status::Ok => {
            let public_addr = response.public_addr.ok_or_else(|| {
                AgentError::Protocol("TUNNEL reply carried no public_addr".to_string())
            })?;
            Ok((channel, public_addr))
        }
        Status::Err => {
            let reason = response
                .error
                .unwrap_or_else(|| "tunnel request refused".to_string());
            if reason.to_lowercase().contains("token") {
                Err(AgentError::Auth(reason))
            } else {
                Err(AgentError::Server(reason))
            }
        }
    }
}

async fn run_established(
    config: &SessionConfig,
    mut channel: ControlChannel,
    public_addr: String,
) -> AgentError {
    info!("🚀 Tunnel active! {}", display_url(&public_addr, config.protocol));

    let heartbeats = HeartbeatState::new();
    let (teardown_tx, mut teardown_rx) = mpsc::channel::<AgentError>(4);

    let mut tickers = Vec::new();
    tickers.push(tokio::spawn(heartbeat::run_watchdog(
        heartbeats.clone(),
        teardown_tx.clone(),
    )));
    if config.health_check {
        let client = relay_health::probe_client();
        tickers.push(tokio::spawn(relay_health::run_probe(
            client.clone(),
            teardown_tx.clone(),
        )));
        let probe = TunnelProbe::new(config.clone(), public_addr.clone(), client);
        tickers.push(tokio::spawn(probe.run(teardown_tx.clone())));
    }
    drop(teardown_tx);

    let error = message_loop(config, &mut channel, &heartbeats, &mut teardown_rx).await;

    // TEARDOWN: the control stream drops with `channel`; running splicers
    // are tied to their own sockets and finish on their own.
    for ticker in &tickers {
        ticker.abort();
    }
    error
}

async fn message_loop(
    config: &SessionConfig,
    channel: &mut ControlChannel,
    heartbeats: &HeartbeatState,
    teardown_rx: &mut mpsc::Receiver<AgentError>,
) -> AgentError {
    loop {
        let next = tokio::select! {
            decoded = timeout(INACTIVITY_TIMEOUT, channel.recv()) => match decoded {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => return e,
                Err(_) => {
                    warn!(
                        idle_secs = INACTIVITY_TIMEOUT.as_secs(),
                        "control channel inactive too long, tearing down"
                    );
                    return AgentError::Closed;
                }
            },
            Some(reason) = teardown_rx.recv() => return reason,
        };

        match serde_json::from_value::<Command>(next.clone()) {
            Ok(Command::NewConn { conn_id, data_addr }) => {
                debug!(conn_id = %conn_id, data_addr = %data_addr, "new connection announced");
                // Spawned without waiting: the decode loop must not block
                // on a splicer.
                tokio::spawn(splice::run_pair(conn_id, data_addr, config.local_addr()));
            }
            Ok(Command::Heartbeat) => {
                debug!("heartbeat");
                heartbeats.beat();
            }
            Ok(other) => {
                debug!(message = ?other, "ignoring unexpected control message");
            }
            Err(_) => {
                debug!(message = %next, "ignoring unknown control message");
            }
        }
    }
}

/// User-facing URL for the activation line.
fn display_url(public_addr: &str, protocol: TunnelProtocol) -> String {
    match protocol {
        TunnelProtocol::Http => match public_addr.strip_suffix(":443") {
            Some(host) => format!("https://{host}"),
            None => format!("http://{public_addr}"),
        },
        TunnelProtocol::Tcp => format!("tcp://{public_addr}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_url_strips_default_https_port() {
        assert_eq!(
            display_url("demo.relais.dev:443", TunnelProtocol::Http),
            "https://demo.relais.dev"
        );
        assert_eq!(
            display_url("demo.relais.dev:8080", TunnelProtocol::Http),
            "http://demo.relais.dev:8080"
        );
        assert_eq!(
            display_url("demo.relais.dev:9000", TunnelProtocol::Tcp),
            "tcp://demo.relais.dev:9000"
        );
    }
}
