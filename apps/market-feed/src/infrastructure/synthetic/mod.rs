//! Synthetic Venue
//!
//! Offline stand-in for a real venue: a mean-reverting random walk around a
//! starting price with a tight fixed spread. Lets the feed run end to end
//! with no network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Session, SessionError, SessionFactory, SessionObserver};
use crate::domain::backpressure::{PushOutcome, QueuePair};
use crate::domain::connection::ConnectionState;
use crate::domain::streaming::{AggressorSide, EventKind, Quote, Trade};
use crate::domain::subscription::{ChannelKind, ChannelSpec, StreamTag};
use crate::infrastructure::metrics;

/// Venue channel name used in stream tags.
pub const VENUE: &str = "synthetic";

/// Shape of the generated market.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Initial mid price.
    pub start_price: f64,
    /// Distance from mid to each side of the book.
    pub half_spread: f64,
    /// Size quoted on both sides.
    pub quote_size: f64,
    /// Size of every trade.
    pub trade_size: f64,
    /// Time between quotes.
    pub quote_interval: Duration,
    /// Time between trades.
    pub trade_interval: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            start_price: 100.0,
            half_spread: 0.01,
            quote_size: 5.0,
            trade_size: 0.5,
            quote_interval: Duration::from_secs(1),
            trade_interval: Duration::from_millis(80),
        }
    }
}

/// Creates [`SyntheticSession`]s.
#[derive(Debug, Clone, Default)]
pub struct SyntheticSessionFactory {
    config: SyntheticConfig,
}

impl SyntheticSessionFactory {
    /// Create a factory for `config`.
    #[must_use]
    pub const fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

impl SessionFactory for SyntheticSessionFactory {
    fn create(
        &self,
        tag: &StreamTag,
        spec: &ChannelSpec,
        queues: Arc<QueuePair>,
    ) -> Arc<dyn Session> {
        Arc::new(SyntheticSession::new(
            self.config.clone(),
            tag.clone(),
            spec.clone(),
            queues,
        ))
    }
}

/// Generates quotes and trades for one stream until cancelled.
///
/// The walk's price survives restarts of the session.
pub struct SyntheticSession {
    config: SyntheticConfig,
    tag: StreamTag,
    spec: ChannelSpec,
    queues: Arc<QueuePair>,
    price: Mutex<f64>,
}

impl SyntheticSession {
    /// Create a session starting at `config.start_price`.
    #[must_use]
    pub fn new(
        config: SyntheticConfig,
        tag: StreamTag,
        spec: ChannelSpec,
        queues: Arc<QueuePair>,
    ) -> Self {
        let price = Mutex::new(config.start_price);
        Self {
            config,
            tag,
            spec,
            queues,
            price,
        }
    }

    /// Current mid of the walk.
    #[must_use]
    pub fn mid(&self) -> f64 {
        *self.price.lock()
    }

    fn next_quote(&self, now_ms: i64) -> Quote {
        let mut rng = rand::rng();
        let mut price = self.price.lock();

        #[allow(clippy::cast_precision_loss)]
        let drift = (now_ms as f64 / 3000.0).sin() * 0.005;
        *price += drift + rng.random_range(-0.01..=0.01);

        Quote {
            timestamp: now_ms,
            bid: round4(*price - self.config.half_spread),
            ask: round4(*price + self.config.half_spread),
            bid_size: self.config.quote_size,
            ask_size: self.config.quote_size,
        }
    }

    fn next_trade(&self, now_ms: i64) -> Trade {
        let mut rng = rand::rng();
        let price = *self.price.lock();
        let side = if rng.random_bool(0.5) {
            AggressorSide::Buy
        } else {
            AggressorSide::Sell
        };

        Trade {
            timestamp: now_ms,
            price: round4(price + rng.random_range(-0.02..=0.02)),
            size: self.config.trade_size,
            side,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[async_trait]
impl Session for SyntheticSession {
    async fn run(
        &self,
        observer: &dyn SessionObserver,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        tracing::info!(tag = %self.tag, "Starting synthetic stream");
        observer.on_state(ConnectionState::Subscribed);
        observer.on_state(ConnectionState::Streaming);

        let quotes_on = self.spec.includes(ChannelKind::L2Book);
        let trades_on = self.spec.includes(ChannelKind::Trades);

        let mut quote_tick = tokio::time::interval(self.config.quote_interval);
        quote_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut trade_tick = tokio::time::interval(self.config.trade_interval);
        trade_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = quote_tick.tick(), if quotes_on => {
                    let quote = self.next_quote(chrono::Utc::now().timestamp_millis());
                    if self.queues.quotes().push(quote) == PushOutcome::EvictedOldest {
                        metrics::record_queue_eviction(EventKind::Quote);
                    }
                }
                _ = trade_tick.tick(), if trades_on => {
                    let trade = self.next_trade(chrono::Utc::now().timestamp_millis());
                    if self.queues.trades().push(trade) == PushOutcome::EvictedOldest {
                        metrics::record_queue_eviction(EventKind::Trade);
                    }
                }
            }
        }
    }
}
