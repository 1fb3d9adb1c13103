//! Capture session lifecycle controller
//!
//! A [`CaptureSession`] owns one UDP socket and one stream state for its
//! whole life. It is single-use: `Idle -> Listening -> Stopped`, with
//! `Stopped` terminal; restarting means constructing a new session.
//!
//! All packet handling runs serialized on one spawned task: receive,
//! parse, classify, reorder, append to the output buffer. The handle
//! side only reads snapshots and drives start/stop, so no lock is ever
//! held across an await point.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::CaptureConfig;
use crate::constants::SOCKET_RECV_BUFFER_SIZE;
use crate::error::{CaptureError, NetworkError, Result};
use crate::jitter::ReorderBuffer;
use crate::protocol::{parse_packet, AudioPacket};
use crate::sequence::{PacketClass, SequenceTracker, StreamState};
use crate::stats::CaptureStatistics;

/// Notifications emitted by a session
///
/// `Stopped` is terminal and emitted exactly once per session lifetime,
/// whichever termination path fired first. `Error` precedes the
/// automatic stop that follows a mid-session socket failure.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Mid-session socket error; the session stops itself right after
    Error(String),
    /// Final statistics; nothing is processed after this
    Stopped(CaptureStatistics),
}

/// Why the session task wound down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Requested,
    DurationReached,
    LossThreshold,
    SocketError,
}

impl StopReason {
    fn as_str(self) -> &'static str {
        match self {
            StopReason::Requested => "requested",
            StopReason::DurationReached => "duration reached",
            StopReason::LossThreshold => "loss threshold breached",
            StopReason::SocketError => "socket error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Listening,
    Stopped,
}

/// State shared between the session handle and its task
struct Shared {
    /// Mutated only by the session task (or by a never-started stop)
    state: Mutex<StreamState>,
    /// Reconstructed interleaved stereo PCM16, in corrected order
    samples: Mutex<Vec<i16>>,
}

/// A single-use UDP capture session
///
/// Sessions are fully independent: each owns its socket and state, and
/// sessions bound to distinct ports never affect one another.
pub struct CaptureSession {
    config: CaptureConfig,
    shared: Arc<Shared>,
    phase: Phase,
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(StreamState::new(Instant::now())),
                samples: Mutex::new(Vec::new()),
            }),
            phase: Phase::Idle,
            local_addr: None,
            task: None,
            shutdown_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Bind the UDP listener and start processing packets.
    ///
    /// Resolves once the socket is bound. On bind failure the session
    /// stays `Idle` with no partial state. If `target_duration_ms` is
    /// configured, the session stops itself once it elapses.
    pub async fn start(&mut self) -> Result<()> {
        match self.phase {
            Phase::Idle => {}
            Phase::Listening => return Err(CaptureError::AlreadyStarted.into()),
            Phase::Stopped => return Err(CaptureError::AlreadyStopped.into()),
        }
        self.config.validate()?;

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port));
        let socket = UdpSocket::bind(bind_addr).await.map_err(|source| {
            NetworkError::BindFailed {
                port: self.config.port,
                source,
            }
        })?;

        // Streams burst; a bigger kernel buffer rides out scheduling
        // hiccups. Not fatal when the OS refuses.
        let sock_ref = socket2::SockRef::from(&socket);
        if let Err(e) = sock_ref.set_recv_buffer_size(SOCKET_RECV_BUFFER_SIZE) {
            tracing::warn!("could not enlarge socket receive buffer: {}", e);
        }

        let local_addr = socket.local_addr()?;
        self.local_addr = Some(local_addr);

        *self.shared.state.lock() = StreamState::new(Instant::now());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let task = tokio::spawn(run_session(
            socket,
            self.config.clone(),
            self.shared.clone(),
            self.event_tx.clone(),
            shutdown_rx,
        ));
        self.task = Some(task);
        self.phase = Phase::Listening;

        tracing::info!("capture session listening on {}", local_addr);
        Ok(())
    }

    /// Stop the session.
    ///
    /// Idempotent: the first call tears down the socket and timers,
    /// flushes the reorder buffer, freezes the duration, and emits
    /// `Stopped` with the final statistics; later calls are no-ops.
    /// Safe on a session that never started. Once `stop()` resolves, no
    /// further packet is processed.
    pub async fn stop(&mut self) -> Result<()> {
        match self.phase {
            Phase::Stopped => Ok(()),
            Phase::Idle => {
                self.phase = Phase::Stopped;
                let stats = {
                    let mut state = self.shared.state.lock();
                    let now = Instant::now();
                    state.started_at = now;
                    state.stopped_at = Some(now);
                    CaptureStatistics::snapshot(&state, now)
                };
                let _ = self.event_tx.send(SessionEvent::Stopped(stats));
                Ok(())
            }
            Phase::Listening => {
                self.phase = Phase::Stopped;
                if let Some(shutdown) = self.shutdown_tx.take() {
                    // Fails only if the task already stopped itself
                    let _ = shutdown.send(());
                }
                if let Some(task) = self.task.take() {
                    task.await
                        .map_err(|e| CaptureError::TaskFailed(e.to_string()))?;
                }
                Ok(())
            }
        }
    }

    /// Live (or, after stop, final) stream quality snapshot
    pub fn statistics(&self) -> CaptureStatistics {
        CaptureStatistics::snapshot(&self.shared.state.lock(), Instant::now())
    }

    /// Configured jitter window in milliseconds, verbatim
    pub fn buffer_time_ms(&self) -> u64 {
        self.config.buffer_time_ms
    }

    /// Address actually bound, available once `start()` resolved
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Drain the reconstructed sample stream accumulated so far
    pub fn take_samples(&self) -> Vec<i16> {
        std::mem::take(&mut *self.shared.samples.lock())
    }

    /// Take the event receiver. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }
}

/// Append flushed packets to the caller-visible output buffer
fn commit_samples(shared: &Shared, packets: Vec<AudioPacket>) {
    if packets.is_empty() {
        return;
    }
    let mut samples = shared.samples.lock();
    for packet in packets {
        samples.extend_from_slice(&packet.samples);
    }
}

/// The session task: everything per-packet happens here, serialized.
async fn run_session(
    socket: UdpSocket,
    config: CaptureConfig,
    shared: Arc<Shared>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let buffer_time = Duration::from_millis(config.buffer_time_ms);
    let mut tracker = SequenceTracker::new();
    let mut reorder = ReorderBuffer::new(buffer_time);
    let mut recv_buf = vec![0u8; 2048];

    // Tick a few times per window so expiry flushes are not stuck
    // waiting for the next arrival.
    let tick_period = (buffer_time / 4).max(Duration::from_millis(5));
    let mut flush_interval = tokio::time::interval(tick_period);
    flush_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let target = config.target_duration_ms.map(Duration::from_millis);
    let duration_sleep = tokio::time::sleep(target.unwrap_or(Duration::from_secs(0)));
    tokio::pin!(duration_sleep);

    let reason = loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                break StopReason::Requested;
            }

            _ = &mut duration_sleep, if target.is_some() => {
                tracing::info!("target capture duration reached");
                break StopReason::DurationReached;
            }

            _ = flush_interval.tick() => {
                let flushed = reorder.flush(Instant::now());
                commit_samples(&shared, flushed);
            }

            result = socket.recv_from(&mut recv_buf) => {
                match result {
                    Ok((len, _from)) => {
                        let now = Instant::now();
                        let data = Bytes::copy_from_slice(&recv_buf[..len]);
                        let Some(packet) = parse_packet(&data, now) else {
                            // Protocol noise: not counted anywhere
                            tracing::trace!(len, "discarding malformed datagram");
                            continue;
                        };

                        let class = {
                            let mut state = shared.state.lock();
                            tracker.record(packet.sequence, &mut state)
                        };
                        match class {
                            PacketClass::Gap(missing) => {
                                tracing::debug!(
                                    sequence = packet.sequence,
                                    missing,
                                    "forward gap, counting loss"
                                );
                            }
                            PacketClass::Reordered => {
                                tracing::trace!(sequence = packet.sequence, "reordered arrival");
                            }
                            PacketClass::InOrder => {}
                        }

                        let flushed = reorder.insert(packet);
                        commit_samples(&shared, flushed);

                        if let Some(max_loss_rate) = config.max_loss_rate {
                            let loss_rate = shared.state.lock().loss_rate();
                            if loss_rate > max_loss_rate {
                                tracing::warn!(
                                    loss_rate,
                                    max_loss_rate,
                                    "loss threshold breached, stopping capture"
                                );
                                break StopReason::LossThreshold;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("socket error during capture: {}", e);
                        let _ = event_tx.send(SessionEvent::Error(e.to_string()));
                        break StopReason::SocketError;
                    }
                }
            }
        }
    };

    // Teardown: socket drops with the task; pending audio still counts.
    let remaining = reorder.flush_all();
    commit_samples(&shared, remaining);

    let stats = {
        let mut state = shared.state.lock();
        let now = Instant::now();
        state.stopped_at = Some(now);
        CaptureStatistics::snapshot(&state, now)
    };

    tracing::info!(
        reason = reason.as_str(),
        packets_received = stats.packets_received,
        packets_lost = stats.packets_lost,
        packets_reordered = stats.packets_reordered,
        loss_rate = stats.loss_rate,
        duration_ms = stats.duration_ms,
        late_drops = reorder.dropped_late(),
        "capture session stopped"
    );

    let _ = event_tx.send(SessionEvent::Stopped(stats));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::AUDIO_PACKET_SIZE;

    fn datagram(sequence: u16) -> Vec<u8> {
        let mut data = vec![0u8; AUDIO_PACKET_SIZE];
        data[..2].copy_from_slice(&sequence.to_le_bytes());
        data
    }

    fn test_config(buffer_time_ms: u64) -> CaptureConfig {
        CaptureConfig {
            port: 0,
            buffer_time_ms,
            ..Default::default()
        }
    }

    async fn feeder_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("bind feeder socket")
    }

    async fn next_stopped(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Option<CaptureStatistics> {
        let deadline = Duration::from_secs(5);
        while let Ok(Some(event)) = tokio::time::timeout(deadline, events.recv()).await {
            if let SessionEvent::Stopped(stats) = event {
                return Some(stats);
            }
        }
        None
    }

    #[test]
    fn buffer_time_is_returned_verbatim() {
        let session = CaptureSession::new(test_config(250));
        assert_eq!(session.buffer_time_ms(), 250);
    }

    #[tokio::test]
    async fn loopback_stream_is_captured_with_low_loss() {
        let mut session = CaptureSession::new(test_config(40));
        let mut events = session.take_events().expect("events");
        session.start().await.expect("start");
        let target = session.local_addr().expect("bound");

        let feeder = feeder_socket().await;
        for seq in 0u16..50 {
            feeder.send_to(&datagram(seq), target).await.expect("send");
            tokio::time::sleep(Duration::from_millis(4)).await;
        }

        // Let the tail of the stream drain through the reorder window
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.stop().await.expect("stop");

        let stats = next_stopped(&mut events).await.expect("stopped event");
        assert!(stats.packets_received > 0);
        assert!(stats.loss_rate < 0.1);
        assert!(stats.duration_ms > 0);

        let samples = session.take_samples();
        assert!(!samples.is_empty());
        // Whole packets only: 384 interleaved samples apiece
        assert_eq!(samples.len() % 384, 0);
    }

    #[tokio::test]
    async fn malformed_datagrams_are_not_counted() {
        let mut session = CaptureSession::new(test_config(20));
        let mut events = session.take_events().expect("events");
        session.start().await.expect("start");
        let target = session.local_addr().expect("bound");

        let feeder = feeder_socket().await;
        feeder.send_to(&[1, 2, 3], target).await.expect("send");
        feeder
            .send_to(&vec![0u8; AUDIO_PACKET_SIZE + 1], target)
            .await
            .expect("send");
        feeder.send_to(&datagram(0), target).await.expect("send");
        feeder.send_to(&datagram(1), target).await.expect("send");

        tokio::time::sleep(Duration::from_millis(100)).await;
        session.stop().await.expect("stop");

        let stats = next_stopped(&mut events).await.expect("stopped event");
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.packets_lost, 0);
    }

    #[tokio::test]
    async fn sessions_on_distinct_ports_are_independent() {
        let mut fed = CaptureSession::new(test_config(20));
        let mut idle = CaptureSession::new(test_config(20));
        fed.start().await.expect("start fed");
        idle.start().await.expect("start idle");
        let target = fed.local_addr().expect("bound");

        let feeder = feeder_socket().await;
        for seq in 0u16..10 {
            feeder.send_to(&datagram(seq), target).await.expect("send");
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        fed.stop().await.expect("stop fed");
        idle.stop().await.expect("stop idle");

        assert!(fed.statistics().packets_received > 0);
        assert_eq!(idle.statistics().packets_received, 0);
        assert!(idle.take_samples().is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_stopped_fires_once() {
        let mut session = CaptureSession::new(test_config(20));
        let mut events = session.take_events().expect("events");
        session.start().await.expect("start");

        session.stop().await.expect("first stop");
        session.stop().await.expect("second stop");
        session.stop().await.expect("third stop");

        assert!(next_stopped(&mut events).await.is_some());
        // Channel must be closed-empty: no second Stopped pending
        drop(session);
        assert!(next_stopped(&mut events).await.is_none());
    }

    #[tokio::test]
    async fn stop_without_start_is_safe_and_still_notifies() {
        let mut session = CaptureSession::new(test_config(20));
        let mut events = session.take_events().expect("events");

        session.stop().await.expect("stop");
        session.stop().await.expect("stop again");

        let stats = next_stopped(&mut events).await.expect("stopped event");
        assert_eq!(stats.packets_received, 0);
        assert_eq!(stats.loss_rate, 0.0);
        drop(session);
        assert!(next_stopped(&mut events).await.is_none());
    }

    #[tokio::test]
    async fn target_duration_stops_the_session() {
        let config = CaptureConfig {
            port: 0,
            buffer_time_ms: 20,
            target_duration_ms: Some(50),
            ..Default::default()
        };
        let mut session = CaptureSession::new(config);
        let mut events = session.take_events().expect("events");
        session.start().await.expect("start");

        // No stop() call: the duration timer must fire on its own
        let stats = next_stopped(&mut events).await.expect("stopped event");
        assert!(stats.duration_ms >= 50);

        // A later manual stop stays a no-op with no second event
        session.stop().await.expect("stop");
        drop(session);
        assert!(next_stopped(&mut events).await.is_none());
    }

    #[tokio::test]
    async fn loss_threshold_breach_soft_stops() {
        let config = CaptureConfig {
            port: 0,
            buffer_time_ms: 20,
            max_loss_rate: Some(0.5),
            ..Default::default()
        };
        let mut session = CaptureSession::new(config);
        let mut events = session.take_events().expect("events");
        session.start().await.expect("start");
        let target = session.local_addr().expect("bound");

        let feeder = feeder_socket().await;
        // Baseline, then a 99-packet gap: loss rate jumps to 99/101
        feeder.send_to(&datagram(0), target).await.expect("send");
        tokio::time::sleep(Duration::from_millis(10)).await;
        feeder.send_to(&datagram(100), target).await.expect("send");

        let stats = next_stopped(&mut events).await.expect("stopped event");
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.packets_lost, 99);
        assert!(stats.loss_rate > 0.5);
    }

    #[tokio::test]
    async fn bind_failure_leaves_session_idle() {
        let mut first = CaptureSession::new(test_config(20));
        first.start().await.expect("start first");
        let port = first.local_addr().expect("bound").port();

        let mut second = CaptureSession::new(CaptureConfig {
            port,
            buffer_time_ms: 20,
            ..Default::default()
        });
        let err = second.start().await.expect_err("bind must fail");
        assert!(matches!(
            err,
            crate::Error::Network(NetworkError::BindFailed { .. })
        ));
        assert!(second.local_addr().is_none());

        // Still Idle: a later start on a free port succeeds
        first.stop().await.expect("stop first");
        second.config.port = 0;
        second.start().await.expect("start second");
        second.stop().await.expect("stop second");
    }

    #[tokio::test]
    async fn out_of_order_stream_reorders_into_output() {
        let mut session = CaptureSession::new(test_config(60));
        session.start().await.expect("start");
        let target = session.local_addr().expect("bound");

        let feeder = feeder_socket().await;
        for seq in [0u16, 2, 1, 4, 3, 5] {
            let mut data = datagram(seq);
            // Tag every sample with the sequence so order is observable
            for pair in data[2..].chunks_exact_mut(2) {
                pair.copy_from_slice(&(seq as i16).to_le_bytes());
            }
            feeder.send_to(&data, target).await.expect("send");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        session.stop().await.expect("stop");

        let stats = session.statistics();
        assert_eq!(stats.packets_received, 6);
        assert!(stats.packets_reordered > 0);

        let samples = session.take_samples();
        assert_eq!(samples.len(), 6 * 384);
        let order: Vec<i16> = samples.chunks_exact(384).map(|c| c[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }
}
