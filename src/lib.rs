//! # Stream Capture
//!
//! Capture engine for a stereo PCM audio stream pushed by a remote hardware
//! device over UDP. The transport offers no ordering, delivery, or
//! duplication guarantees, so the engine reconstructs a usable sample stream
//! and characterizes the network quality while doing so.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        HARDWARE DEVICE                           │
//! │   Streams 770-byte datagrams: [u16 LE seq | 192 stereo frames]   │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ UDP (unreliable)
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       CAPTURE SESSION                            │
//! │  ┌──────────┐   ┌───────────────┐   ┌──────────────────────┐     │
//! │  │  Packet  │──▶│   Sequence    │──▶│   Reorder (Jitter)   │     │
//! │  │  Parser  │   │   Tracker     │   │       Buffer         │     │
//! │  └──────────┘   │ (loss/reorder │   │ (time-bounded, flush │     │
//! │                 │   counters)   │   │  in sequence order)  │     │
//! │                 └───────────────┘   └──────────┬───────────┘     │
//! │                                                ▼                 │
//! │        statistics()                    reconstructed i16         │
//! │        snapshot on demand              sample output buffer      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session owns one UDP socket and one stream state; all packet handling
//! is serialized onto a single tokio task. Statistics describe arrival order
//! (network quality); the reorder buffer output describes delivered audio.
//! The two views are intentionally allowed to diverge.

pub mod config;
pub mod error;
pub mod jitter;
pub mod protocol;
pub mod sequence;
pub mod session;
pub mod stats;

pub use config::CaptureConfig;
pub use error::{Error, Result};
pub use session::{CaptureSession, SessionEvent};
pub use stats::CaptureStatistics;

/// Application-wide constants
pub mod constants {
    /// Stereo frames carried by each datagram
    pub const SAMPLES_PER_PACKET: usize = 192;

    /// Channel count (interleaved stereo)
    pub const CHANNELS: usize = 2;

    /// Bytes per PCM sample (signed 16-bit little-endian)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Size of the sequence header in bytes
    pub const SEQUENCE_HEADER_SIZE: usize = 2;

    /// Exact datagram size; anything else is protocol noise
    pub const AUDIO_PACKET_SIZE: usize =
        SEQUENCE_HEADER_SIZE + SAMPLES_PER_PACKET * CHANNELS * BYTES_PER_SAMPLE;

    /// Default jitter buffer window in milliseconds
    pub const DEFAULT_BUFFER_TIME_MS: u64 = 250;

    /// Default UDP port the hardware streams toward
    pub const DEFAULT_PORT: u16 = 5000;

    /// Socket receive buffer size requested at bind time
    pub const SOCKET_RECV_BUFFER_SIZE: usize = 1 << 20;
}
