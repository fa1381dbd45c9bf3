//! Port Interfaces
//!
//! Defines the interfaces (ports) between the feed core and the outside
//! world following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SessionFactory` / `Session`: one venue streaming connection
//! - `SessionObserver`: lifecycle callbacks a session reports into
//!
//! ## Driver Ports (Inbound)
//!
//! - `MarketDataPort`: blocking quote/trade sequences for the strategy layer
//! - `ExecutionPath`: sync → async crossing for execution backends

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::backpressure::QueuePair;
use crate::domain::connection::ConnectionState;
use crate::domain::streaming::{Quote, Trade};
use crate::domain::subscription::{ChannelSpec, StreamTag};

/// Boxed error accepted from bridge operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Session Ports
// =============================================================================

/// Why a session ended.
///
/// Every variant is transient: the reconnect controller backs off and
/// starts a new session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Transport could not be opened.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport did not open in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A subscribe request could not be sent.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Read or write on an open transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// No frame arrived within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Receives lifecycle transitions from a running session.
pub trait SessionObserver: Send + Sync {
    /// Called when the session enters `state`.
    fn on_state(&self, state: ConnectionState);
}

/// One physical streaming connection to a venue.
///
/// `run` connects, subscribes and pushes decoded events into the session's
/// queues until the transport fails or `cancel` fires. It never retries
/// internally.
#[async_trait]
pub trait Session: Send + Sync {
    /// Run one connection lifecycle.
    ///
    /// Returns `Ok(())` only when cancelled.
    async fn run(
        &self,
        observer: &dyn SessionObserver,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError>;
}

/// Builds sessions for the stream registry.
#[cfg_attr(test, mockall::automock)]
pub trait SessionFactory: Send + Sync {
    /// Create the session serving `tag`, pushing into `queues`.
    fn create(
        &self,
        tag: &StreamTag,
        spec: &ChannelSpec,
        queues: Arc<QueuePair>,
    ) -> Arc<dyn Session>;
}

// =============================================================================
// Driver Ports
// =============================================================================

/// Blocking market data sequences for the strategy layer.
///
/// Calling either method repeatedly for one symbol never starts a second
/// network session.
pub trait MarketDataPort {
    /// Error returned before any worker starts.
    type Error;
    /// Quote sequence handle.
    type Quotes: Iterator<Item = Quote>;
    /// Trade sequence handle.
    type Trades: Iterator<Item = Trade>;

    /// Blocking sequence of quotes for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol cannot be served.
    fn subscribe_quotes(&self, symbol: &str) -> Result<Self::Quotes, Self::Error>;

    /// Blocking sequence of trades for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol cannot be served.
    fn subscribe_trades(&self, symbol: &str) -> Result<Self::Trades, Self::Error>;
}

/// Sync → async crossing used by execution backends.
///
/// Operations are closures that build their future on the async side, so
/// the future itself never crosses threads.
pub trait ExecutionPath {
    /// Error returned to callers.
    type Error;

    /// Run `operation` on the async side and block for its result.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails or cannot be submitted.
    fn submit_and_wait<F, Fut, T, E>(&self, operation: F) -> Result<T, Self::Error>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static;

    /// Run `operation` on the async side without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error only if the operation cannot be submitted.
    fn submit_async<F, Fut, E>(&self, operation: F) -> Result<(), Self::Error>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + 'static,
        E: Into<BoxError> + 'static;
}
