//! Capture statistics snapshot

use std::time::Instant;

use serde::Serialize;

use crate::sequence::StreamState;

/// Immutable stream quality snapshot, derived on demand
///
/// `loss_rate` and `duration_ms` are recomputed from the counters at
/// snapshot time rather than stored, so a snapshot can never disagree
/// with the state it was taken from.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CaptureStatistics {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub packets_reordered: u64,
    pub loss_rate: f64,
    pub duration_ms: u64,
}

impl CaptureStatistics {
    /// Snapshot the given state as of `now`.
    ///
    /// While the session is live, `duration_ms` keeps growing; once the
    /// state carries a `stopped_at` the duration is frozen there.
    pub fn snapshot(state: &StreamState, now: Instant) -> Self {
        Self {
            packets_received: state.packets_received,
            packets_lost: state.packets_lost,
            packets_reordered: state.packets_reordered,
            loss_rate: state.loss_rate(),
            duration_ms: state.duration_ms(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn snapshot_reflects_counters() {
        let start = Instant::now();
        let mut state = StreamState::new(start);
        state.packets_received = 90;
        state.packets_lost = 10;
        state.packets_reordered = 3;

        let stats = CaptureStatistics::snapshot(&state, start + Duration::from_millis(2000));
        assert_eq!(stats.packets_received, 90);
        assert_eq!(stats.packets_lost, 10);
        assert_eq!(stats.packets_reordered, 3);
        assert!((stats.loss_rate - 0.1).abs() < 1e-9);
        assert_eq!(stats.duration_ms, 2000);
    }

    #[test]
    fn empty_state_snapshots_cleanly() {
        let start = Instant::now();
        let stats = CaptureStatistics::snapshot(&StreamState::new(start), start);
        assert_eq!(stats.packets_received, 0);
        assert_eq!(stats.loss_rate, 0.0);
        assert_eq!(stats.duration_ms, 0);
    }

    #[test]
    fn serializes_for_reporting() {
        let start = Instant::now();
        let stats = CaptureStatistics::snapshot(&StreamState::new(start), start);
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"packets_received\":0"));
        assert!(json.contains("\"loss_rate\":0.0"));
    }
}
