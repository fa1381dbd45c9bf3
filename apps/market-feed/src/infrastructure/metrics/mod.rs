//! Prometheus Metrics Module
//!
//! Exposes feed metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound venue frames by channel, and malformed frames
//! - **Queues**: items evicted from full drop-oldest queues
//! - **Sessions**: session starts and reconnects
//! - **Bridge**: async bridge calls by outcome
//!
//! # Integration
//!
//! When a listen address is configured the exporter serves `/metrics` on it.
//! Otherwise the recorder is installed and rendered through the returned
//! handle.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::EventKind;
use crate::domain::subscription::ChannelKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Metrics installation errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The exporter or recorder could not be installed.
    #[error("failed to install Prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Initialize the Prometheus metrics recorder.
///
/// With `listen` set, an HTTP exporter is started on that address and no
/// handle is returned. Subsequent calls return the first result.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics(listen: Option<SocketAddr>) -> Result<Option<PrometheusHandle>, MetricsError> {
    if let Some(existing) = PROMETHEUS_HANDLE.get() {
        return Ok(existing.clone());
    }

    let handle = match listen {
        Some(addr) => {
            PrometheusBuilder::new().with_http_listener(addr).install()?;
            tracing::info!(%addr, "Prometheus exporter listening");
            None
        }
        None => Some(PrometheusBuilder::new().install_recorder()?),
    };

    register_metrics();
    let _ = PROMETHEUS_HANDLE.set(handle.clone());
    Ok(handle)
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized or are served over
/// HTTP.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned().flatten()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_feed_frames_received_total",
        "Total market data frames received from venues"
    );
    describe_counter!(
        "market_feed_frames_malformed_total",
        "Total inbound frames dropped because they failed to decode"
    );
    describe_counter!(
        "market_feed_queue_evictions_total",
        "Total queued events evicted by newer ones"
    );
    describe_counter!(
        "market_feed_reconnects_total",
        "Total session reconnect attempts"
    );
    describe_counter!(
        "market_feed_sessions_started_total",
        "Total supervised sessions started by the stream registry"
    );
    describe_counter!(
        "market_feed_bridge_calls_total",
        "Total async bridge calls by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for bridge call outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Operation returned `Ok`.
    Ok,
    /// Operation returned an error.
    Failed,
    /// Operation did not finish before its deadline.
    TimedOut,
    /// Operation panicked.
    Panicked,
}

impl BridgeOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Panicked => "panicked",
        }
    }
}

/// Record a market data frame received on `channel`.
pub fn record_frame_received(channel: ChannelKind) {
    counter!(
        "market_feed_frames_received_total",
        "channel" => channel.as_str()
    )
    .increment(1);
}

/// Record a frame dropped by the codec.
pub fn record_frame_malformed() {
    counter!("market_feed_frames_malformed_total").increment(1);
}

/// Record an event evicted from a full queue.
pub fn record_queue_eviction(kind: EventKind) {
    counter!(
        "market_feed_queue_evictions_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect() {
    counter!("market_feed_reconnects_total").increment(1);
}

/// Record a supervised session start.
pub fn record_session_started() {
    counter!("market_feed_sessions_started_total").increment(1);
}

/// Record a finished bridge call.
pub fn record_bridge_call(outcome: BridgeOutcome) {
    counter!(
        "market_feed_bridge_calls_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_outcome_as_str() {
        assert_eq!(BridgeOutcome::Ok.as_str(), "ok");
        assert_eq!(BridgeOutcome::Failed.as_str(), "failed");
        assert_eq!(BridgeOutcome::TimedOut.as_str(), "timed_out");
        assert_eq!(BridgeOutcome::Panicked.as_str(), "panicked");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_frame_received(ChannelKind::Trades);
        record_frame_malformed();
        record_queue_eviction(EventKind::Quote);
        record_reconnect();
        record_session_started();
        record_bridge_call(BridgeOutcome::Ok);
    }
}
