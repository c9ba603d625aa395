//! Failure bookkeeping for the supervisor.
//!
//! Two sliding 60 s windows, one for server-initiated closures and one
//! for network errors, drive the backoff policy. The tracker is owned and
//! mutated by the supervisor alone; backoff is a pure function of the
//! current window.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AgentError;

const WINDOW: Duration = Duration::from_secs(60);
const MAX_SERVER_CLOSURES: usize = 4;
const BACKOFF_FLOOR_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

/// OS error codes classified as transient network failures.
const NETWORK_ERROR_CODES: [&str; 6] = [
    "EHOSTUNREACH",
    "ENETUNREACH",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
];

#[derive(Debug, Default)]
pub struct FailureTracker {
    server_closures: VecDeque<Instant>,
    network_errors: VecDeque<Instant>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_server_closure(&mut self) {
        Self::record(&mut self.server_closures, Instant::now());
    }

    pub fn record_network_error(&mut self) {
        Self::record(&mut self.network_errors, Instant::now());
    }

    fn record(deque: &mut VecDeque<Instant>, at: Instant) {
        deque.push_back(at);
        while deque
            .front()
            .is_some_and(|t| at.duration_since(*t) > WINDOW)
        {
            deque.pop_front();
        }
    }

    fn count_recent(deque: &VecDeque<Instant>, now: Instant) -> usize {
        deque
            .iter()
            .filter(|t| now.duration_since(**t) <= WINDOW)
            .count()
    }

    pub fn server_closure_count(&self) -> usize {
        Self::count_recent(&self.server_closures, Instant::now())
    }

    pub fn network_error_count(&self) -> usize {
        Self::count_recent(&self.network_errors, Instant::now())
    }

    /// Reconnect delay: 1 s doubling with every failure in the window,
    /// capped at 30 s. 1 s when the window is clean.
    pub fn backoff_duration(&self) -> Duration {
        let failures = self.server_closure_count() + self.network_error_count();
        if failures == 0 {
            return Duration::from_millis(BACKOFF_FLOOR_MS);
        }
        let exponent = (failures - 1).min(15) as u32;
        let millis = (BACKOFF_FLOOR_MS << exponent).min(BACKOFF_CAP_MS);
        Duration::from_millis(millis)
    }

    /// Server-closure rate ceiling. Informational in agent mode: the
    /// supervisor logs it and keeps reconnecting.
    pub fn should_stop_reconnecting(&self) -> bool {
        self.server_closure_count() >= MAX_SERVER_CLOSURES
    }

    /// Clear both windows. Called after a successful establishment.
    pub fn reset(&mut self) {
        self.server_closures.clear();
        self.network_errors.clear();
    }
}

/// True when `err` is a transient network failure: unreachable host or
/// network, refused connection, timeout, or failed lookup.
pub fn is_network_error(err: &AgentError) -> bool {
    let AgentError::Network(io) = err else {
        return false;
    };
    use std::io::ErrorKind;
    matches!(
        io.kind(),
        ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::ConnectionRefused
            | ErrorKind::TimedOut
            | ErrorKind::NotFound
    ) || {
        let text = io.to_string();
        NETWORK_ERROR_CODES.iter().any(|code| text.contains(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_per_failure() {
        let mut tracker = FailureTracker::new();

        // Scenario: five server closures inside the window.
        let expected = [1, 2, 4, 8, 16];
        for secs in expected {
            tracker.record_server_closure();
            assert_eq!(tracker.backoff_duration(), Duration::from_secs(secs));
            advance(Duration::from_secs(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_never_exceeds_the_cap() {
        let mut tracker = FailureTracker::new();
        for _ in 0..40 {
            tracker.record_network_error();
        }
        assert_eq!(tracker.backoff_duration(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn clean_window_backs_off_one_second() {
        let tracker = FailureTracker::new();
        assert_eq!(tracker.backoff_duration(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn old_entries_fall_out_of_the_window() {
        let mut tracker = FailureTracker::new();
        tracker.record_network_error();
        tracker.record_network_error();
        assert_eq!(tracker.network_error_count(), 2);

        advance(Duration::from_secs(61)).await;
        assert_eq!(tracker.network_error_count(), 0);
        assert_eq!(tracker.backoff_duration(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn closure_ceiling_is_reached_at_four() {
        let mut tracker = FailureTracker::new();
        for _ in 0..3 {
            tracker.record_server_closure();
        }
        assert!(!tracker.should_stop_reconnecting());
        tracker.record_server_closure();
        assert!(tracker.should_stop_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn closures_spread_past_the_window_do_not_hit_the_ceiling() {
        let mut tracker = FailureTracker::new();
        for _ in 0..4 {
            tracker.record_server_closure();
            advance(Duration::from_secs(25)).await;
        }
        assert!(!tracker.should_stop_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_both_windows() {
        let mut tracker = FailureTracker::new();
        tracker.record_server_closure();
        tracker.record_network_error();
        tracker.reset();
        assert_eq!(tracker.server_closure_count(), 0);
        assert_eq!(tracker.network_error_count(), 0);
    }

    #[test]
    fn classification_by_error_kind() {
        for kind in [
            std::io::ErrorKind::ConnectionRefused,
            std::io::ErrorKind::TimedOut,
            std::io::ErrorKind::HostUnreachable,
            std::io::ErrorKind::NetworkUnreachable,
            std::io::ErrorKind::NotFound,
        ] {
            let err = AgentError::Network(std::io::Error::new(kind, "boom"));
            assert!(is_network_error(&err), "{kind:?} must classify as network");
        }
    }

    #[test]
    fn classification_by_error_text() {
        let err = AgentError::Network(std::io::Error::other("getaddrinfo ENOTFOUND relay"));
        assert!(is_network_error(&err));
    }

    #[test]
    fn non_network_kinds_do_not_classify() {
        assert!(!is_network_error(&AgentError::Auth("bad token".into())));
        assert!(!is_network_error(&AgentError::Closed));
        assert!(!is_network_error(&AgentError::Protocol("bad magic".into())));
    }
}
