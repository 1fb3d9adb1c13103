//! Sequence tracking and loss/reorder classification
//!
//! The tracker maintains the "next expected sequence" cursor over the
//! wrapping 16-bit ring and classifies each valid packet by its signed
//! wraparound distance from that cursor. It drives the stream quality
//! counters; it has no influence on which samples reach the output
//! stream (that is the reorder buffer's job).

use std::time::Instant;

use crate::protocol::seq_delta;

/// Classification of a valid packet relative to the expected cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    /// Exactly the expected sequence
    InOrder,
    /// Ahead of expectation; the skipped count is inferred lost
    Gap(u32),
    /// Behind expectation: reordered or duplicate arrival
    Reordered,
}

/// Per-session stream quality state
///
/// Owned exclusively by one capture session and mutated only by its
/// [`SequenceTracker`]. Counters are monotonic for the session lifetime.
#[derive(Debug, Clone)]
pub struct StreamState {
    pub expected_sequence: u16,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub packets_reordered: u64,
    pub started_at: Instant,
    pub stopped_at: Option<Instant>,
}

impl StreamState {
    pub fn new(started_at: Instant) -> Self {
        Self {
            expected_sequence: 0,
            packets_received: 0,
            packets_lost: 0,
            packets_reordered: 0,
            started_at,
            stopped_at: None,
        }
    }

    /// Loss fraction, recomputed from the counters on every read.
    ///
    /// `lost / (received + lost)`, clamped to [0, 1] and defined as 0.0
    /// when nothing has been seen yet. Never stored incrementally, so it
    /// cannot diverge from the counters. Once a gap has been counted as
    /// loss it is not reversed by a late arrival for that sequence; the
    /// rate is an accepted approximation, not an exact accounting.
    pub fn loss_rate(&self) -> f64 {
        let denominator = self.packets_received + self.packets_lost;
        if denominator == 0 {
            return 0.0;
        }
        (self.packets_lost as f64 / denominator as f64).clamp(0.0, 1.0)
    }

    /// Session duration in milliseconds, live until `stopped_at` freezes it
    pub fn duration_ms(&self, now: Instant) -> u64 {
        let end = self.stopped_at.unwrap_or(now);
        end.duration_since(self.started_at).as_millis() as u64
    }
}

/// Classifies packets and updates the session's [`StreamState`]
#[derive(Debug)]
pub struct SequenceTracker {
    /// Cursor is meaningless before the first packet baselines it
    primed: bool,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self { primed: false }
    }

    /// Record the arrival of a valid packet.
    ///
    /// The first packet baselines the cursor to its own sequence, so a
    /// stream may begin anywhere on the ring without counting phantom
    /// loss. After that:
    ///
    /// - delta == 0: in order; cursor advances by one.
    /// - delta > 0: forward gap; `delta` packets counted lost and the
    ///   cursor re-baselines past the arrival rather than waiting for
    ///   the missing packets.
    /// - delta < 0: behind the cursor (reordered or duplicate); counted
    ///   as reordered, cursor never rewinds.
    ///
    /// Every path counts the packet itself as received.
    pub fn record(&mut self, sequence: u16, state: &mut StreamState) -> PacketClass {
        if !self.primed {
            self.primed = true;
            state.expected_sequence = sequence;
        }

        let delta = seq_delta(sequence, state.expected_sequence);

        let class = if delta == 0 {
            state.expected_sequence = sequence.wrapping_add(1);
            PacketClass::InOrder
        } else if delta > 0 {
            state.packets_lost += delta as u64;
            state.expected_sequence = sequence.wrapping_add(1);
            PacketClass::Gap(delta as u32)
        } else {
            state.packets_reordered += 1;
            PacketClass::Reordered
        };

        state.packets_received += 1;
        class
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
