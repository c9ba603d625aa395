//! Outbound dialing and TCP tunables.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::AgentError;

/// Connect timeout for every outbound stream.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Backoff schedule for DNS resolution retries.
const DNS_RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const SOCKET_BUF_SIZE: usize = 256 * 1024;

/// Apply the tunables shared by control and data streams: no Nagle,
/// keepalive with a 30 s idle, 256 KiB socket buffers.
pub fn apply_socket_tuning(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    let _ = sock.set_tcp_keepalive(&keepalive);
    let _ = sock.set_recv_buffer_size(SOCKET_BUF_SIZE);
    let _ = sock.set_send_buffer_size(SOCKET_BUF_SIZE);
}

/// Resolve `addr`, retrying DNS failures up to three times (2 s / 4 s /
/// 8 s). Prefers IPv4, like the rest of the stack.
async fn resolve(addr: &str) -> Result<SocketAddr, AgentError> {
    let mut attempt = 0;
    loop {
        match lookup_host(addr).await {
            Ok(addrs) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                return addrs
                    .iter()
                    .find(|a| a.is_ipv4())
                    .or_else(|| addrs.first())
                    .copied()
                    .ok_or_else(|| {
                        AgentError::Network(std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            format!("no addresses found for {addr}"),
                        ))
                    });
            }
            Err(e) if attempt < DNS_RETRY_BACKOFF.len() => {
                let delay = DNS_RETRY_BACKOFF[attempt];
                warn!(
                    addr = %addr,
                    error = %e,
                    retry_in_secs = delay.as_secs(),
                    "DNS resolution failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(AgentError::Network(e)),
        }
    }
}

async fn connect_addr(resolved: SocketAddr, display: &str) -> Result<TcpStream, AgentError> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(resolved))
        .await
        .map_err(|_| {
            AgentError::Network(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {display} timed out"),
            ))
        })??;
    apply_socket_tuning(&stream);
    Ok(stream)
}

/// Dial the relay: resolve with DNS retries, connect with the standard
/// timeout, apply tunables.
pub async fn connect_relay(addr: &str) -> Result<TcpStream, AgentError> {
    let resolved = resolve(addr).await?;
    connect_addr(resolved, addr).await
}

/// Dial a data channel or the local service. No DNS retry here: these
/// addresses are either literal or already known-resolvable, and a failed
/// pair is simply abandoned.
pub async fn connect(addr: &str) -> Result<TcpStream, AgentError> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            AgentError::Network(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out"),
            ))
        })??;
    apply_socket_tuning(&stream);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_reaches_a_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = connect(&addr.to_string()).await.unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn connect_refused_is_a_network_error() {
        // Bind and drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(&addr.to_string()).await.unwrap_err();
        assert!(matches!(err, AgentError::Network(_)));
    }

    #[tokio::test]
    async fn resolve_accepts_literal_addresses() {
        let addr = resolve("127.0.0.1:80").await.unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 80);
    }
}
