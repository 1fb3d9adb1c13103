//! Wire format for the hardware's UDP audio stream
//!
//! Each datagram is exactly [`AUDIO_PACKET_SIZE`] bytes: a little-endian
//! u16 sequence number followed by 192 interleaved stereo frames of
//! 16-bit little-endian PCM. Anything with a different size is treated
//! as protocol noise and silently discarded.

use std::time::Instant;

use bytes::Bytes;

use crate::constants::{AUDIO_PACKET_SIZE, SEQUENCE_HEADER_SIZE};

/// A decoded audio datagram
///
/// Ephemeral: created on socket receive, consumed into the reorder buffer
/// or discarded.
#[derive(Debug, Clone)]
pub struct AudioPacket {
    /// Wrapping 16-bit sequence number
    pub sequence: u16,
    /// Interleaved stereo PCM16 samples (left, right, left, right, ...)
    pub samples: Vec<i16>,
    /// Arrival time, used by the reorder window
    pub received_at: Instant,
}

impl AudioPacket {
    /// Number of stereo frames in this packet
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }
}

/// Decode a raw datagram into an [`AudioPacket`].
///
/// Returns `None` for any datagram whose length is not exactly
/// [`AUDIO_PACKET_SIZE`]. Malformed datagrams are not counted anywhere;
/// they never reach the sequence tracker. Pure function, no side effects
/// beyond decoding.
pub fn parse_packet(data: &Bytes, received_at: Instant) -> Option<AudioPacket> {
    if data.len() != AUDIO_PACKET_SIZE {
        return None;
    }

    let sequence = u16::from_le_bytes([data[0], data[1]]);

    let payload = &data[SEQUENCE_HEADER_SIZE..];
    let mut samples = Vec::with_capacity(payload.len() / 2);
    for pair in payload.chunks_exact(2) {
        samples.push(i16::from_le_bytes([pair[0], pair[1]]));
    }

    Some(AudioPacket {
        sequence,
        samples,
        received_at,
    })
}

/// Signed wraparound distance from `b` to `a` on the 16-bit sequence ring.
///
/// Result is in `[-32768, 32767]`: positive when `a` is ahead of `b`,
/// negative when behind. Raw subtraction is never correct near the
/// 65535 -> 0 boundary; every sequence comparison in this crate goes
/// through this function.
pub fn seq_delta(a: u16, b: u16) -> i32 {
    ((i32::from(a) - i32::from(b) + 32768 + 65536) % 65536) - 32768
}
