//! Keepalive Monitor
//!
//! Asks the session to send a ping (or venue heartbeat) every
//! `ping_interval` and reports a timeout when an outstanding ping sees no
//! inbound traffic for longer than `pong_timeout`. Any inbound frame counts
//! as a reply.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::SessionConfig;

/// Keepalive timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping.
    pub pong_timeout: Duration,
}

impl HeartbeatConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Take timing from a session configuration.
    #[must_use]
    pub const fn from_session(config: &SessionConfig) -> Self {
        Self::new(config.ping_interval, config.pong_timeout)
    }
}

/// Heartbeat requests to the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping now.
    SendPing,
    /// No reply in time; treat the connection as faulted.
    Timeout,
}

/// State shared between the monitor and the reader.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: RwLock<Instant>,
    last_ping: RwLock<Option<Instant>>,
    waiting: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
            last_ping: RwLock::new(None),
            waiting: AtomicBool::new(false),
        }
    }

    /// Record inbound traffic.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
        self.waiting.store(false, Ordering::SeqCst);
    }

    /// Record that a ping went out.
    pub fn mark_ping_sent(&self) {
        *self.last_ping.write() = Some(Instant::now());
        self.waiting.store(true, Ordering::SeqCst);
    }

    /// Check if a ping is outstanding.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }

    /// Time since the outstanding ping went out.
    #[must_use]
    pub fn time_since_ping(&self) -> Option<Duration> {
        if !self.is_waiting() {
            return None;
        }
        self.last_ping.read().map(|t| t.elapsed())
    }

    /// Reset for a new connection.
    pub fn reset(&self) {
        *self.last_inbound.write() = Instant::now();
        *self.last_ping.write() = None;
        self.waiting.store(false, Ordering::SeqCst);
    }
}

/// Drives [`HeartbeatEvent`]s for one connection.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver is dropped or a timeout fires.
    pub async fn run(self) {
        // Check often enough to notice a timeout shorter than the ping interval.
        let check_every = self
            .config
            .ping_interval
            .min(self.config.pong_timeout)
            .max(Duration::from_millis(5));
        let mut interval = tokio::time::interval(check_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        let mut next_ping = tokio::time::Instant::now() + self.config.ping_interval;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Some(elapsed) = self.state.time_since_ping() {
                        if elapsed > self.config.pong_timeout {
                            tracing::warn!(
                                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                                timeout_ms = u64::try_from(self.config.pong_timeout.as_millis()).unwrap_or(u64::MAX),
                                "Heartbeat timeout detected"
                            );
                            let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                            break;
                        }
                    }

                    let now = tokio::time::Instant::now();
                    if now >= next_ping && !self.state.is_waiting() {
                        next_ping = now + self.config.ping_interval;
                        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                            tracing::debug!("Heartbeat receiver dropped");
                            break;
                        }
                    }
                }
            }
        }
    }
}
