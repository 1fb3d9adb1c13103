//! Capture Application
//!
//! Runs one capture session against an incoming hardware PCM stream and
//! reports stream quality. Final statistics are printed as JSON on exit
//! so an orchestrator can consume them.

use anyhow::Result;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_capture::{CaptureConfig, CaptureSession, SessionEvent};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting capture session");

    // Either a TOML profile path or a bare port number; defaults otherwise
    let config = match std::env::args().nth(1) {
        Some(arg) if arg.ends_with(".toml") => CaptureConfig::load(&arg)?,
        Some(arg) => CaptureConfig {
            port: arg.parse()?,
            ..Default::default()
        },
        None => CaptureConfig::default(),
    };

    tracing::info!(
        port = config.port,
        buffer_time_ms = config.buffer_time_ms,
        max_loss_rate = ?config.max_loss_rate,
        target_duration_ms = ?config.target_duration_ms,
        "capture profile"
    );

    let mut session = CaptureSession::new(config);
    let mut events = session
        .take_events()
        .expect("events taken once at startup");

    session.start().await?;
    if let Some(addr) = session.local_addr() {
        tracing::info!("listening for hardware stream on {}", addr);
    }

    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    stats_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut samples_reconstructed: u64 = 0;

    // Run until the session ends on its own or the operator interrupts
    let final_stats = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Stopped(stats)) => break stats,
                Some(SessionEvent::Error(message)) => {
                    tracing::error!("session error: {}", message);
                }
                None => {
                    anyhow::bail!("session event channel closed unexpectedly");
                }
            },

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping capture");
                session.stop().await?;
            }

            _ = stats_interval.tick() => {
                samples_reconstructed += session.take_samples().len() as u64;
                let stats = session.statistics();
                tracing::info!(
                    "Stats: {} received, {} lost ({:.1}% loss), {} reordered, {} samples reconstructed",
                    stats.packets_received,
                    stats.packets_lost,
                    stats.loss_rate * 100.0,
                    stats.packets_reordered,
                    samples_reconstructed,
                );
            }
        }
    };

    samples_reconstructed += session.take_samples().len() as u64;
    tracing::info!(
        samples_reconstructed,
        "capture finished after {} ms",
        final_stats.duration_ms
    );

    println!("{}", serde_json::to_string_pretty(&final_stats)?);
    Ok(())
}
