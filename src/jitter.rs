//! Time-bounded reorder (jitter) buffer
//!
//! Holds recently arrived packets for a configurable window so that
//! slightly out-of-order arrivals can self-correct before their samples
//! are committed to the output stream. This layer is deliberately
//! independent from the sequence tracker's statistics: the tracker
//! describes network quality in arrival order, the buffer decides what
//! audio is actually delivered, and the two views may diverge.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{seq_delta, AudioPacket};

/// Bounded reorder window over the 16-bit sequence ring
pub struct ReorderBuffer {
    /// How long a packet may wait for its predecessors
    buffer_time: Duration,
    /// Pending packets not yet flushed, keyed by sequence
    pending: HashMap<u16, AudioPacket>,
    /// Next sequence to emit; unset until the first flush
    cursor: Option<u16>,
    /// Stragglers that arrived after their window had closed
    dropped_late: u64,
}

impl ReorderBuffer {
    pub fn new(buffer_time: Duration) -> Self {
        Self {
            buffer_time,
            pending: HashMap::new(),
            cursor: None,
            dropped_late: 0,
        }
    }

    /// Configured window, verbatim
    pub fn buffer_time_ms(&self) -> u64 {
        self.buffer_time.as_millis() as u64
    }

    /// Packets currently waiting in the window
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Packets permanently dropped for arriving behind the flush cursor
    pub fn dropped_late(&self) -> u64 {
        self.dropped_late
    }

    /// Accept a packet and return whatever became eligible to flush, in
    /// corrected sequence order.
    ///
    /// A packet behind the flush cursor missed its window and is dropped
    /// permanently; it is never spliced into already-emitted output. A
    /// duplicate of a still-pending sequence replaces the pending copy.
    pub fn insert(&mut self, packet: AudioPacket) -> Vec<AudioPacket> {
        let now = packet.received_at;

        if let Some(cursor) = self.cursor {
            if seq_delta(packet.sequence, cursor) < 0 {
                self.dropped_late += 1;
                return self.flush(now);
            }
        }

        self.pending.insert(packet.sequence, packet);
        self.flush(now)
    }

    /// Flush every pending packet whose turn has come.
    ///
    /// Repeatedly takes the pending packet nearest the cursor on the
    /// ring and emits it when it is contiguous with the cursor, or when
    /// it has sat longer than the window (the gap ahead of it is then
    /// given up on and the cursor jumps past it). Called on every insert
    /// and on the session's periodic tick.
    pub fn flush(&mut self, now: Instant) -> Vec<AudioPacket> {
        let mut flushed = Vec::new();

        while let Some(next_seq) = self.next_pending_seq() {
            let contiguous = self.cursor == Some(next_seq);
            let expired = self
                .pending
                .get(&next_seq)
                .map(|p| now.duration_since(p.received_at) >= self.buffer_time)
                .unwrap_or(false);

            if !(contiguous || expired) {
                break;
            }

            if let Some(packet) = self.pending.remove(&next_seq) {
                self.cursor = Some(next_seq.wrapping_add(1));
                flushed.push(packet);
            }
        }

        flushed
    }

    /// Drain everything left, in ascending wraparound order. Used when
    /// the session stops.
    pub fn flush_all(&mut self) -> Vec<AudioPacket> {
        let mut flushed = Vec::new();
        while let Some(next_seq) = self.next_pending_seq() {
            if let Some(packet) = self.pending.remove(&next_seq) {
                self.cursor = Some(next_seq.wrapping_add(1));
                flushed.push(packet);
            }
        }
        flushed
    }

    /// The pending sequence nearest the cursor in wraparound order.
    ///
    /// Before the first flush there is no cursor; any pending key serves
    /// as the reference, and the wraparound-least element wins.
    fn next_pending_seq(&self) -> Option<u16> {
        let reference = self.cursor.or_else(|| self.pending.keys().next().copied())?;
        self.pending
            .keys()
            .copied()
            .min_by_key(|&seq| seq_delta(seq, reference))
    }
}
