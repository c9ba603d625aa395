//! Control-channel message types.
//!
//! The message set is closed: five `command`-tagged messages plus the
//! tunnel response, which carries no `command` field on the wire and is
//! therefore its own struct.

use serde::{Deserialize, Serialize};

/// Reply status used by the handshake ack and the tunnel response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERR")]
    Err,
}

/// Kind of tunnel requested from the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProtocol {
    Http,
    Tcp,
}

impl std::str::FromStr for TunnelProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "http" => Ok(TunnelProtocol::Http),
            "tcp" => Ok(TunnelProtocol::Tcp),
            other => Err(format!("unknown protocol '{other}' (expected http or tcp)")),
        }
    }
}

impl std::fmt::Display for TunnelProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelProtocol::Http => f.write_str("http"),
            TunnelProtocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// `command`-tagged control messages.
///
/// `local_port` and `remote_port` travel as digit strings and absent
/// optionals as empty strings, matching what the relay expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    #[serde(rename = "SECURE_INIT")]
    SecureInit { client_public_key: String },

    #[serde(rename = "SECURE_ACK")]
    SecureAck {
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_public_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "TUNNEL")]
    Tunnel {
        local_port: String,
        domain: String,
        remote_port: String,
        token: String,
        protocol: TunnelProtocol,
    },

    #[serde(rename = "NEWCONN")]
    NewConn { conn_id: String, data_addr: String },

    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
}

/// Reply to a `TUNNEL` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
