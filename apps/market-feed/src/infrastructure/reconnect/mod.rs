//! Reconnection Supervision
//!
//! Implements exponential backoff for venue sessions and the controller that
//! restarts a failed session forever:
//!
//! ```text
//! Idle → Connecting → Subscribed → Streaming → Failed → Backoff → Connecting …
//! ```
//!
//! The backoff delay is multiplied after every failed cycle (capped at the
//! configured maximum) and reset to the minimum the moment a session reaches
//! `Streaming`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Session, SessionObserver};
use crate::domain::connection::ConnectionState;
use crate::domain::subscription::StreamTag;
use crate::infrastructure::metrics;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt, and after a reset.
    pub min_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each attempt).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        min_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            min_delay,
            max_delay,
            multiplier,
            jitter_factor,
        }
    }

    /// Bring the values into the range the policy relies on: a delay of at
    /// least [`MIN_BACKOFF`], a cap no lower than the minimum, a multiplier
    /// of at least 1 and a jitter factor in `0..=1`.
    #[must_use]
    pub fn normalized(self) -> Self {
        let min_delay = self.min_delay.max(MIN_BACKOFF);
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let jitter_factor = if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            min_delay,
            max_delay: self.max_delay.max(min_delay),
            multiplier,
            jitter_factor,
        }
    }
}

/// Shortest backoff a policy sleeps between attempts.
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

// =============================================================================
// Policy
// =============================================================================

/// Reconnection policy implementing exponential backoff with optional jitter.
///
/// Jitter only perturbs the returned sleep; the tracked delay stays exact.
///
/// # Example
///
/// ```rust
/// use market_feed::infrastructure::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Duration::from_secs(1));
/// assert_eq!(policy.next_delay(), Duration::from_secs(2));
///
/// // Session reached Streaming
/// policy.reset();
/// assert_eq!(policy.current_delay(), Duration::from_secs(1));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy from the [normalized] `config`.
    ///
    /// [normalized]: ReconnectConfig::normalized
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let config = config.normalized();
        let min_delay = config.min_delay;
        Self {
            config,
            current_delay: min_delay,
        }
    }

    /// Get the delay to sleep now, then advance the backoff.
    pub fn next_delay(&mut self) -> Duration {
        let delay_with_jitter = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis
            .max(self.current_delay.as_millis())
            .min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        delay_with_jitter
    }

    /// Reset the policy after a successful session.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.min_delay;
    }

    /// Delay the next failure will sleep, before jitter.
    #[must_use]
    pub const fn current_delay(&self) -> Duration {
        self.current_delay
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Connection state and backoff of one supervised stream.
///
/// Illegal transitions are logged and ignored.
#[derive(Debug)]
pub struct ConnectionMonitor {
    tag: StreamTag,
    state: RwLock<ConnectionState>,
    policy: Mutex<ReconnectPolicy>,
    reconnects: AtomicU64,
}

impl ConnectionMonitor {
    /// Create a monitor in `Idle`.
    #[must_use]
    pub fn new(tag: StreamTag, config: ReconnectConfig) -> Self {
        Self {
            tag,
            state: RwLock::new(ConnectionState::Idle),
            policy: Mutex::new(ReconnectPolicy::new(config)),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Move to `next` if legal. Entering `Streaming` resets the backoff.
    ///
    /// Returns whether the transition was applied.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write();
        let previous = *state;
        if previous == next {
            return true;
        }
        if !previous.can_transition_to(next) {
            tracing::warn!(
                tag = %self.tag,
                from = %previous,
                to = %next,
                "Ignoring illegal connection transition"
            );
            return false;
        }

        *state = next;
        if next == ConnectionState::Streaming {
            self.policy.lock().reset();
        }
        tracing::debug!(tag = %self.tag, from = %previous, to = %next, "Connection state");
        true
    }

    /// Take the next backoff delay and count the reconnect.
    pub fn next_backoff(&self) -> Duration {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        metrics::record_reconnect();
        self.policy.lock().next_delay()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Delay the next failure will sleep, before jitter.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.policy.lock().current_delay()
    }

    /// Reconnect attempts since creation.
    #[must_use]
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Stream this monitor belongs to.
    #[must_use]
    pub const fn tag(&self) -> &StreamTag {
        &self.tag
    }
}

impl SessionObserver for ConnectionMonitor {
    fn on_state(&self, state: ConnectionState) {
        self.transition(state);
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Runs one session, backs off on failure and starts it again, until
/// cancelled.
pub struct ReconnectController {
    session: Arc<dyn Session>,
    monitor: Arc<ConnectionMonitor>,
    cancel: CancellationToken,
}

impl ReconnectController {
    /// Create a controller for `session`.
    #[must_use]
    pub fn new(
        tag: StreamTag,
        session: Arc<dyn Session>,
        config: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            monitor: Arc::new(ConnectionMonitor::new(tag, config)),
            cancel,
        }
    }

    /// Shared view of the connection state and backoff.
    #[must_use]
    pub fn monitor(&self) -> Arc<ConnectionMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.monitor.state()
    }

    /// Delay the next failure will sleep, before jitter.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.monitor.current_delay()
    }

    /// Reconnect attempts since creation.
    #[must_use]
    pub fn reconnect_count(&self) -> u64 {
        self.monitor.reconnect_count()
    }

    /// Supervise the session until cancelled.
    ///
    /// A panicking session counts as a failed cycle and is restarted.
    pub async fn run(self) {
        let tag = self.monitor.tag().clone();
        tracing::info!(tag = %tag, "Stream supervisor started");

        loop {
            self.monitor.transition(ConnectionState::Connecting);

            let session = AssertUnwindSafe(self.session.run(self.monitor.as_ref(), &self.cancel));
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                result = session.catch_unwind() => Some(result),
            };

            match result {
                None => break,
                Some(Ok(Ok(()))) if self.cancel.is_cancelled() => break,
                Some(Ok(Ok(()))) => {
                    tracing::warn!(tag = %tag, "Session returned without cancellation");
                }
                Some(Ok(Err(e))) => {
                    tracing::warn!(
                        tag = %tag,
                        state = %self.monitor.state(),
                        error = %e,
                        "Session failed"
                    );
                }
                Some(Err(payload)) => {
                    tracing::error!(
                        tag = %tag,
                        state = %self.monitor.state(),
                        panic = panic_message(payload.as_ref()),
                        "Session panicked"
                    );
                }
            }

            self.monitor.transition(ConnectionState::Failed);
            self.monitor.transition(ConnectionState::Backoff);

            let delay = self.monitor.next_backoff();
            tracing::info!(
                tag = %tag,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = self.monitor.reconnect_count(),
                "Reconnecting after delay"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!(tag = %tag, "Cancelled during reconnect delay");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.monitor.transition(ConnectionState::Idle);
        tracing::info!(tag = %tag, "Stream supervisor stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use test_case::test_case;
    use tokio::time::Instant;

    use super::*;
    use crate::application::ports::SessionError;
    use crate::domain::subscription::ChannelSpec;

    fn exact(min_ms: u64, max_ms: u64, multiplier: f64) -> ReconnectConfig {
        ReconnectConfig::new(
            Duration::from_millis(min_ms),
            Duration::from_millis(max_ms),
            multiplier,
            0.0,
        )
    }

    fn tag() -> StreamTag {
        let spec = ChannelSpec::for_symbol("test", "SOL-PERP").unwrap();
        StreamTag::new("SOL-PERP", &spec)
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.min_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn policy_exponential_backoff() {
        let mut policy = ReconnectPolicy::new(exact(100, 10_000, 2.0));

        assert_eq!(policy.next_delay(), Duration::from_millis(100));
        assert_eq!(policy.next_delay(), Duration::from_millis(200));
        assert_eq!(policy.next_delay(), Duration::from_millis(400));
        assert_eq!(policy.current_delay(), Duration::from_millis(800));
    }

    #[test]
    fn policy_max_delay_cap() {
        let mut policy = ReconnectPolicy::new(exact(1000, 2000, 4.0));

        let _ = policy.next_delay();
        assert_eq!(policy.next_delay(), Duration::from_millis(2000));
        assert_eq!(policy.next_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn zero_min_delay_still_backs_off() {
        let mut policy = ReconnectPolicy::new(exact(0, 30_000, 2.0));

        let delays: Vec<Duration> = (0..5).map(|_| policy.next_delay()).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn min_above_max_never_exceeds_cap() {
        let mut policy = ReconnectPolicy::new(exact(5000, 1000, 2.0));

        for _ in 0..4 {
            assert_eq!(policy.next_delay(), Duration::from_millis(5000));
        }
        assert_eq!(policy.current_delay(), Duration::from_millis(5000));
    }

    #[test_case(0.5 ; "shrinking")]
    #[test_case(f64::NAN ; "nan")]
    #[test_case(f64::INFINITY ; "infinite")]
    fn bad_multiplier_holds_delay_constant(multiplier: f64) {
        let mut policy = ReconnectPolicy::new(exact(100, 10_000, multiplier));

        assert_eq!(policy.next_delay(), Duration::from_millis(100));
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(exact(100, 10_000, 2.0));
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..ReconnectConfig::default()
            });

            let millis = policy.next_delay().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
            assert_eq!(policy.current_delay(), Duration::from_secs(2));
        }
    }

    #[test]
    fn monitor_rejects_illegal_transition() {
        let monitor = ConnectionMonitor::new(tag(), ReconnectConfig::default());
        assert!(!monitor.transition(ConnectionState::Streaming));
        assert_eq!(monitor.state(), ConnectionState::Idle);

        assert!(monitor.transition(ConnectionState::Connecting));
        assert!(monitor.transition(ConnectionState::Subscribed));
        assert!(monitor.transition(ConnectionState::Streaming));
        assert_eq!(monitor.state(), ConnectionState::Streaming);
    }

    #[test]
    fn monitor_resets_backoff_on_streaming() {
        let monitor = ConnectionMonitor::new(tag(), exact(100, 10_000, 2.0));
        for _ in 0..3 {
            monitor.transition(ConnectionState::Connecting);
            monitor.transition(ConnectionState::Failed);
            monitor.transition(ConnectionState::Backoff);
            let _ = monitor.next_backoff();
        }
        assert_eq!(monitor.current_delay(), Duration::from_millis(800));
        assert_eq!(monitor.reconnect_count(), 3);

        monitor.transition(ConnectionState::Connecting);
        monitor.transition(ConnectionState::Subscribed);
        assert_eq!(monitor.current_delay(), Duration::from_millis(800));
        monitor.transition(ConnectionState::Streaming);
        assert_eq!(monitor.current_delay(), Duration::from_millis(100));
    }

    proptest! {
        #[test]
        fn delay_is_monotonic_until_streaming(
            min_ms in 1u64..5_000,
            extra_ms in 0u64..60_000,
            multiplier in 1.0f64..4.0,
            failures in 1usize..40,
        ) {
            let max_ms = min_ms + extra_ms;
            let monitor = ConnectionMonitor::new(tag(), exact(min_ms, max_ms, multiplier));

            let mut previous = Duration::ZERO;
            for _ in 0..failures {
                monitor.transition(ConnectionState::Connecting);
                monitor.transition(ConnectionState::Failed);
                monitor.transition(ConnectionState::Backoff);
                let delay = monitor.next_backoff();
                prop_assert!(delay >= previous);
                prop_assert!(delay <= Duration::from_millis(max_ms));
                previous = delay;
            }

            monitor.transition(ConnectionState::Connecting);
            monitor.transition(ConnectionState::Subscribed);
            monitor.transition(ConnectionState::Streaming);
            prop_assert_eq!(monitor.current_delay(), Duration::from_millis(min_ms));
        }
    }

    // =========================================================================
    // Controller
    // =========================================================================

    #[derive(Debug, Clone, Copy)]
    enum Step {
        RefuseConnect,
        Panic,
        StreamThenDrop,
        StreamUntilCancelled,
    }

    struct ScriptedSession {
        steps: Mutex<VecDeque<Step>>,
        starts: Mutex<Vec<Instant>>,
    }

    impl ScriptedSession {
        fn new(steps: &[Step]) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.iter().copied().collect()),
                starts: Mutex::new(Vec::new()),
            })
        }

        fn start_offsets_ms(&self, origin: Instant) -> Vec<u128> {
            self.starts
                .lock()
                .iter()
                .map(|start| start.duration_since(origin).as_millis())
                .collect()
        }
    }

    #[async_trait]
    impl Session for ScriptedSession {
        async fn run(
            &self,
            observer: &dyn SessionObserver,
            cancel: &CancellationToken,
        ) -> Result<(), SessionError> {
            self.starts.lock().push(Instant::now());
            let step = self
                .steps
                .lock()
                .pop_front()
                .unwrap_or(Step::RefuseConnect);

            match step {
                Step::RefuseConnect => Err(SessionError::ConnectionFailed("refused".into())),
                Step::Panic => panic!("session bug"),
                Step::StreamThenDrop => {
                    observer.on_state(ConnectionState::Subscribed);
                    observer.on_state(ConnectionState::Streaming);
                    Err(SessionError::ConnectionClosed)
                }
                Step::StreamUntilCancelled => {
                    observer.on_state(ConnectionState::Subscribed);
                    observer.on_state(ConnectionState::Streaming);
                    cancel.cancelled().await;
                    Ok(())
                }
            }
        }
    }

    fn assert_offsets(actual: &[u128], expected: &[u128]) {
        assert!(actual.len() >= expected.len(), "starts: {actual:?}");
        for (got, want) in actual.iter().zip(expected) {
            assert!(
                *got >= *want && *got <= *want + 5,
                "starts {actual:?} differ from {expected:?}"
            );
        }
    }

    async fn wait_for_state(monitor: &ConnectionMonitor, state: ConnectionState) {
        while monitor.state() != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn controller_backs_off_and_resets_after_streaming() {
        let session = ScriptedSession::new(&[
            Step::RefuseConnect,
            Step::RefuseConnect,
            Step::StreamThenDrop,
            Step::RefuseConnect,
            Step::StreamUntilCancelled,
        ]);
        let cancel = CancellationToken::new();
        let controller = ReconnectController::new(
            tag(),
            session.clone(),
            exact(1000, 30_000, 2.0),
            cancel.clone(),
        );
        let monitor = controller.monitor();

        let origin = Instant::now();
        let task = tokio::spawn(controller.run());

        wait_for_state(&monitor, ConnectionState::Streaming).await;
        // Sleeps: 1s, 2s, reset, 1s, 2s.
        let starts = session.start_offsets_ms(origin);
        assert_eq!(starts.len(), 5);
        assert_offsets(&starts, &[0, 1000, 3000, 4000, 6000]);
        assert_eq!(monitor.reconnect_count(), 4);
        assert_eq!(monitor.current_delay(), Duration::from_millis(1000));

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(monitor.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_session_is_restarted_after_backoff() {
        let session = ScriptedSession::new(&[Step::Panic, Step::Panic, Step::StreamUntilCancelled]);
        let cancel = CancellationToken::new();
        let controller = ReconnectController::new(
            tag(),
            session.clone(),
            exact(1000, 30_000, 2.0),
            cancel.clone(),
        );
        let monitor = controller.monitor();
        let origin = Instant::now();
        let task = tokio::spawn(controller.run());

        wait_for_state(&monitor, ConnectionState::Streaming).await;
        assert_offsets(&session.start_offsets_ms(origin), &[0, 1000, 3000]);
        assert_eq!(monitor.reconnect_count(), 2);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(monitor.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_caps_at_max() {
        let session = ScriptedSession::new(&[]);
        let cancel = CancellationToken::new();
        let controller =
            ReconnectController::new(tag(), session.clone(), exact(1000, 4000, 2.0), cancel.clone());
        let monitor = controller.monitor();
        let origin = Instant::now();
        let task = tokio::spawn(controller.run());

        while session.starts.lock().len() < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();

        assert_offsets(
            &session.start_offsets_ms(origin),
            &[0, 1000, 3000, 7000, 11_000],
        );
        assert_eq!(monitor.current_delay(), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff_sleep() {
        let session = ScriptedSession::new(&[]);
        let cancel = CancellationToken::new();
        let controller = ReconnectController::new(
            tag(),
            session.clone(),
            exact(60_000, 60_000, 1.0),
            cancel.clone(),
        );
        let monitor = controller.monitor();
        let task = tokio::spawn(controller.run());

        wait_for_state(&monitor, ConnectionState::Backoff).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_millis(100), task)
            .await
            .expect("controller should stop promptly")
            .unwrap();
        assert_eq!(session.starts.lock().len(), 1);
        assert_eq!(monitor.state(), ConnectionState::Idle);
    }
}
