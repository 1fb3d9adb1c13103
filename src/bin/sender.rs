//! Test Stream Sender
//!
//! Stands in for the hardware device: streams 770-byte PCM datagrams
//! with a wrapping 16-bit sequence toward a capture session. Knobs for
//! dropping and swapping packets make loss and reorder handling easy to
//! exercise over loopback.

use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_capture::constants::{AUDIO_PACKET_SIZE, CHANNELS, SAMPLES_PER_PACKET};

/// Build one wire datagram: u16 LE sequence + 192 stereo frames of a
/// 440 Hz tone, PCM16 LE interleaved.
fn build_datagram(sequence: u16, phase: &mut f32) -> Vec<u8> {
    let mut data = Vec::with_capacity(AUDIO_PACKET_SIZE);
    data.extend_from_slice(&sequence.to_le_bytes());

    let step = 440.0 * 2.0 * std::f32::consts::PI / 48_000.0;
    for _ in 0..SAMPLES_PER_PACKET {
        let value = (phase.sin() * 0.5 * f32::from(i16::MAX)) as i16;
        for _ in 0..CHANNELS {
            data.extend_from_slice(&value.to_le_bytes());
        }
        *phase += step;
    }

    data
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Args: [target] [count] [drop_every] [swap_every]
    let mut args = std::env::args().skip(1);
    let target: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:5000".to_string())
        .parse()?;
    let count: u64 = args.next().unwrap_or_else(|| "2500".to_string()).parse()?;
    let drop_every: u64 = args.next().unwrap_or_else(|| "0".to_string()).parse()?;
    let swap_every: u64 = args.next().unwrap_or_else(|| "0".to_string()).parse()?;

    tracing::info!(
        %target,
        count,
        drop_every,
        swap_every,
        "streaming synthetic PCM"
    );

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let mut phase = 0.0f32;
    let mut sent: u64 = 0;
    let mut held_back: Option<Vec<u8>> = None;

    for i in 0..count {
        let sequence = (i % 65536) as u16;
        let datagram = build_datagram(sequence, &mut phase);

        if drop_every > 0 && i % drop_every == drop_every - 1 {
            // Simulated loss: the sequence is consumed but never sent
        } else if swap_every > 0 && i % swap_every == swap_every - 1 {
            // Simulated reorder: hold one packet back and send it after
            // its successor
            held_back = Some(datagram);
        } else {
            socket.send_to(&datagram, target).await?;
            sent += 1;
            if let Some(late) = held_back.take() {
                socket.send_to(&late, target).await?;
                sent += 1;
            }
        }

        // ~4 ms pacing, matching 192 frames at 48 kHz
        tokio::time::sleep(Duration::from_millis(4)).await;

        if sent > 0 && sent % 1000 == 0 {
            tracing::info!("{} packets sent", sent);
        }
    }

    if let Some(late) = held_back.take() {
        socket.send_to(&late, target).await?;
        sent += 1;
    }

    tracing::info!("done, {} packets sent", sent);
    Ok(())
}
