//! Error taxonomy of the agent.
//!
//! The supervisor dispatches on this closed enum, so classification is
//! total and checked at compile time.

use relais_crypto::CryptoError;
use relais_proto::FrameError;
use thiserror::Error;

/// Terminal error of one control session.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The relay rejected the tunnel request for an auth reason. Fatal:
    /// the process exits instead of reconnecting.
    #[error("authentication rejected by relay: {0}")]
    Auth(String),

    /// The relay refused the tunnel for a non-auth reason.
    #[error("relay refused the tunnel: {0}")]
    Server(String),

    /// Malformed framing or an invalid message where a specific one was
    /// required. No resync is attempted on a broken session.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The control stream ended without our intent. The display text is
    /// the sentinel the supervisor matches for server closures.
    #[error("Connection closed by server")]
    Closed,

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// The DIALING→RUNNING segment exceeded the establishment timeout.
    #[error("tunnel establishment timed out")]
    EstablishTimeout,

    /// The relay health probe demanded a tear-down.
    #[error("relay unreachable, health probe triggered reconnect")]
    HealthMonitorTriggered,

    /// The tunnel reachability probe demanded a tear-down.
    #[error("tunnel unreachable, health probe triggered reconnect")]
    TunnelHealthTriggered,
}

impl From<FrameError> for AgentError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Closed => AgentError::Closed,
            FrameError::Io(e) => AgentError::Network(e),
            other => AgentError::Protocol(other.to_string()),
        }
    }
}
