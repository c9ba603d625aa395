//! Supervisor: keeps the agent alive indefinitely.
//!
//! Runs one control session at a time, forever. Every terminal error is
//! classified through the closed [`AgentError`] enum; only an auth
//! rejection ends the process. In agent mode the closure-rate ceiling is
//! informational: it is logged, never obeyed.

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::AgentError;
use crate::failure::{self, FailureTracker};
use crate::relay_health;
use crate::session;

/// Run sessions forever, reconnecting on every non-auth failure. Returns
/// only the fatal auth error. Holds zero live streams between attempts.
pub async fn run(config: SessionConfig) -> AgentError {
    let mut tracker = FailureTracker::new();
    let probe_client = relay_health::probe_client();

    loop {
        let outcome = session::run_session(&config).await;
        if outcome.established {
            // The tunnel was live; the next attempt starts from a clean
            // failure window.
            tracker.reset();
        }

        let err = outcome.error;
        match &err {
            AgentError::Auth(reason) => {
                error!(reason = %reason, "authentication rejected by relay, giving up");
                return err;
            }
            AgentError::HealthMonitorTriggered => {
                relay_health::wait_until_healthy(&probe_client).await;
                continue;
            }
            AgentError::EstablishTimeout => {
                // Backing off on slowness only makes it worse.
                warn!("establishment timed out, retrying immediately");
                continue;
            }
            AgentError::TunnelHealthTriggered => {
                warn!("tunnel unreachable end to end, reconnecting immediately");
                tracker.reset();
                continue;
            }
            AgentError::Closed => {
                info!("connection closed by server");
                tracker.record_server_closure();
            }
            other => {
                if !failure::is_network_error(other) {
                    debug!(error = %other, "unclassified error, treating as network failure");
                }
                tracker.record_network_error();
            }
        }

        if tracker.should_stop_reconnecting() {
            warn!(
                closures = tracker.server_closure_count(),
                "server closed the connection repeatedly, continuing anyway"
            );
        }

        let delay = tracker.backoff_duration();
        warn!(
            error = %err,
            delay_secs = delay.as_secs_f64(),
            "session ended, reconnecting after backoff"
        );
        sleep(delay).await;
    }
}
