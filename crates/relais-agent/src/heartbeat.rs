//! Heartbeat watchdog for the control channel.
//!
//! The relay sends `HEARTBEAT` at a cadence of at most 30 s. The session
//! records every arrival; the watchdog ticks at a fixed interval and
//! declares the stream dead when the gap exceeds [`DEAD_AFTER`].

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant};
use tracing::{info, warn};

use crate::error::AgentError;

/// The stream is declared dead past this heartbeat gap.
pub const DEAD_AFTER: Duration = Duration::from_secs(30);

/// A one-shot warning is logged past this gap. Only observable when a
/// check tick sees a large monotonic jump, e.g. after machine suspend.
const WARN_AFTER: Duration = Duration::from_secs(120);

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Shared heartbeat clock: the session updates it, the watchdog reads it.
#[derive(Clone)]
pub struct HeartbeatState {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    last: Instant,
    warned: bool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                last: Instant::now(),
                warned: false,
            })),
        }
    }

    /// Record an inbound HEARTBEAT.
    pub fn beat(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.warned {
            info!("heartbeat received again, control channel recovered");
            inner.warned = false;
        }
        inner.last = Instant::now();
    }

    /// Evaluate the gap. Returns the gap when the stream must be declared
    /// dead.
    fn check(&self) -> Option<Duration> {
        let mut inner = self.inner.lock().unwrap();
        let gap = inner.last.elapsed();
        if gap > WARN_AFTER && !inner.warned {
            warn!(
                gap_secs = gap.as_secs(),
                "no heartbeat for a long while, control channel may be stale"
            );
            inner.warned = true;
        }
        (gap > DEAD_AFTER).then_some(gap)
    }
}

/// Tick until the heartbeat gap crosses the threshold, then request a
/// `Closed` teardown. Aborted by the session on teardown.
pub async fn run_watchdog(state: HeartbeatState, teardown: mpsc::Sender<AgentError>) {
    let mut ticker = interval(CHECK_INTERVAL);
    loop {
        ticker.tick().await;
        if let Some(gap) = state.check() {
            warn!(
                gap_secs = gap.as_secs(),
                "heartbeat timeout, tearing down control channel"
            );
            let _ = teardown.send(AgentError::Closed).await;
            return;
        }
    }
}
