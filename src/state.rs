//! Poller phase and status snapshots.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PollerPhase {
    /// Not running. No timer armed.
    Stopped,
    /// Running with the consumer visible; the timer is armed.
    ArmedVisible,
    /// Running but paused because the consumer is hidden.
    ArmedHidden,
}

impl PollerPhase {
    /// Derives the phase from the running and visibility flags.
    pub fn from_flags(running: bool, visible: bool) -> Self {
        match (running, visible) {
            (false, _) => PollerPhase::Stopped,
            (true, true) => PollerPhase::ArmedVisible,
            (true, false) => PollerPhase::ArmedHidden,
        }
    }
}

/// Point-in-time view of a poller for logging and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerStatus {
    /// Poller instance id.
    pub id: String,
    pub phase: PollerPhase,
    /// Current backoff multiplier.
    pub multiplier: u32,
    /// Effective interval in milliseconds.
    pub effective_interval_ms: u64,
    /// Whether a fetch is awaiting the source.
    pub in_flight: bool,
    /// Completed cycles whose outcome reached the observer.
    pub cycles_completed: u64,
    pub successes: u64,
    pub failures: u64,
    /// Failures since the last success.
    pub consecutive_failures: u64,
    /// Triggers dropped because a fetch was already in flight.
    pub coalesced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_follows_flags() {
        assert_eq!(PollerPhase::from_flags(false, true), PollerPhase::Stopped);
        assert_eq!(PollerPhase::from_flags(false, false), PollerPhase::Stopped);
        assert_eq!(PollerPhase::from_flags(true, true), PollerPhase::ArmedVisible);
        assert_eq!(PollerPhase::from_flags(true, false), PollerPhase::ArmedHidden);
    }

    #[test]
    fn status_serializes_to_json() {
        let status = PollerStatus {
            id: "abc".to_string(),
            phase: PollerPhase::ArmedHidden,
            multiplier: 4,
            effective_interval_ms: 240_000,
            in_flight: false,
            cycles_completed: 3,
            successes: 1,
            failures: 2,
            consecutive_failures: 2,
            coalesced: 0,
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"phase\":\"armed-hidden\""));
        assert!(json.contains("\"effective_interval_ms\":240000"));
    }
}
