#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Feed - Venue Market Data Ingestion
//!
//! Maintains one supervised WebSocket session per symbol and venue channel,
//! buffers best bid/ask quotes and trades in bounded drop-oldest queues, and
//! hands them to synchronous consumers as blocking iterators. Synchronous
//! execution code reaches async clients through a single-thread bridge.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Quotes, trades and aggressor side
//!   - `subscription`: Symbols, channel specs and stream tags
//!   - `connection`: Per-stream connection state machine
//!   - `backpressure`: Drop-oldest queues
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Session, market data and execution path interfaces
//!   - `services`: Stream registry and market feed
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `hyperliquid`: WebSocket session, codec and heartbeat
//!   - `synthetic`: Offline random-walk venue
//!   - `reconnect`: Backoff and stream supervision
//!   - `bridge`: Async bridge for execution paths
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! venue WS --> Session --> QueuePair (quotes, trades) --> QuoteStream / TradeStream --> consumer threads
//!                ^
//!      ReconnectController (backoff, state)
//!
//! execution thread --> AsyncBridge --> worker thread (current-thread runtime) --> async client
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::backpressure::{DropOldestQueue, PushOutcome, QueuePair};
pub use domain::connection::ConnectionState;
pub use domain::streaming::{AggressorSide, Quote, Trade};
pub use domain::subscription::{ChannelKind, ChannelSpec, ConfigurationError, StreamTag, Symbol};

// Application
pub use application::ports::{ExecutionPath, MarketDataPort};
pub use application::services::{
    FeedError, FeedOptions, MarketFeed, QuoteStream, StreamRegistry, TradeStream,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FeedConfig, Venue};

// Bridge
pub use infrastructure::bridge::{AsyncBridge, BridgeConfig, BridgeError, ClientBridge};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
