//! Heartbeat Manager
//!
//! Keeps a Hyperliquid session honest. The venue expects an application-level
//! `{"method":"ping"}` and answers on the `pong` channel; any inbound frame
//! counts as liveness. When nothing arrives within the timeout after a ping
//! the session is failed so the supervisor reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping requests.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(40),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping request now.
    SendPing,
    /// No liveness within the timeout; fail the session.
    Timeout,
}

/// Liveness shared between the heartbeat manager and the session read loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: RwLock<Instant>,
    waiting_for_pong: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state with activity recorded now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
            waiting_for_pong: AtomicBool::new(false),
        }
    }

    /// Record any inbound frame.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
        self.waiting_for_pong.store(false, Ordering::SeqCst);
    }

    /// Mark that a ping was sent.
    pub fn mark_ping_sent(&self) {
        self.waiting_for_pong.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.read().elapsed()
    }
}

/// Emits ping requests on an interval and a timeout when the peer goes
/// silent.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
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

    /// Run until cancelled, a timeout is reported, or the session stops
    /// listening.
    pub async fn run(self) {
        let start = Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.check_and_ping().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `false` when the loop should exit.
    async fn check_and_ping(&self) -> bool {
        if self.state.is_waiting_for_pong() {
            let elapsed = self.state.time_since_activity();
            if elapsed > self.config.pong_timeout {
                tracing::warn!(
                    elapsed_secs = elapsed.as_secs(),
                    timeout_secs = self.config.pong_timeout.as_secs(),
                    "Heartbeat timeout detected"
                );
                let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                return false;
            }
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return false;
        }

        true
    }
}
