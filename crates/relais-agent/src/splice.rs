//! Per-connection bidirectional forwarder.
//!
//! Each NEWCONN gets one data/local socket pair. The two copy directions
//! are independent and communicate only through half-close; the pair is
//! torn down when both directions have finished or either one fails.
//! Failures are confined to the pair and never reach the control session.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, warn};

use crate::net;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Handle one announced connection: open the data channel, open the local
/// service, then copy in both directions until done.
pub async fn run_pair(conn_id: String, data_addr: String, local_addr: String) {
    let data = match net::connect(&data_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(
                conn_id = %conn_id,
                data_addr = %data_addr,
                error = %e,
                "failed to open data channel, abandoning connection"
            );
            return;
        }
    };

    let local = match net::connect(&local_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            // The data stream drops with this return, so the pair dies
            // together. Common when the user's service is restarting.
            warn!(
                conn_id = %conn_id,
                local_addr = %local_addr,
                error = %e,
                "local service unreachable, abandoning connection"
            );
            return;
        }
    };

    let (data_read, data_write) = data.into_split();
    let (local_read, local_write) = local.into_split();

    let upstream = copy_half(local_read, data_write);
    let downstream = copy_half(data_read, local_write);

    // On the first error the composite future completes and the surviving
    // half drops, closing both sockets together.
    match tokio::try_join!(upstream, downstream) {
        Ok((bytes_up, bytes_down)) => {
            debug!(
                conn_id = %conn_id,
                bytes_up,
                bytes_down,
                "connection pair finished"
            );
        }
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "connection pair aborted");
        }
    }
}

/// Copy one direction. On source EOF the destination gets a write-side
/// shutdown only: the opposite direction may still be live.
async fn copy_half(mut read: OwnedReadHalf, mut write: OwnedWriteHalf) -> std::io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = read.read(&mut buf).await?;
        if n == 0 {
            write.shutdown().await?;
            return Ok(total);
        }
        write.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
