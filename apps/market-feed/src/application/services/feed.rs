//! Market Feed
//!
//! The consumer-facing entry point. Owns the I/O runtime the sessions run on
//! and hands out blocking quote and trade sequences per symbol. The first
//! request for a symbol starts its stream; later requests reuse it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use super::registry::{RegistryConfig, StreamRegistry};
use crate::application::ports::{MarketDataPort, SessionFactory};
use crate::domain::backpressure::QueuePair;
use crate::domain::streaming::{Quote, Trade};
use crate::domain::subscription::{
    ChannelKind, ChannelSpec, ConfigurationError, Symbol, to_venue_coin,
};

/// Errors returned by [`MarketFeed`].
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The symbol or channel cannot be served.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The I/O runtime could not be built.
    #[error("failed to build I/O runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// The feed was shut down.
    #[error("market feed is shut down")]
    ShutDown,
}

/// Market feed settings.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Venue channel name used in stream tags.
    pub venue: String,
    /// Channel kinds every stream subscribes.
    pub channels: Vec<ChannelKind>,
    /// Queue and reconnect settings.
    pub registry: RegistryConfig,
    /// Worker threads of the I/O runtime (`None` = one per core).
    pub io_threads: Option<usize>,
    /// How long `shutdown` waits for the I/O runtime.
    pub shutdown_timeout: Duration,
}

impl FeedOptions {
    /// Defaults for `venue`.
    #[must_use]
    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            channels: ChannelKind::all().to_vec(),
            registry: RegistryConfig::default(),
            io_threads: None,
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// Blocking market data for synchronous consumers.
pub struct MarketFeed {
    venue: String,
    channels: Vec<ChannelKind>,
    runtime: Mutex<Option<Runtime>>,
    registry: StreamRegistry,
    subscriptions: Mutex<HashMap<Symbol, Arc<QueuePair>>>,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
}

impl MarketFeed {
    /// Build the I/O runtime; no stream starts until first requested.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Runtime`] if the runtime cannot be built.
    pub fn new(factory: Arc<dyn SessionFactory>, options: FeedOptions) -> Result<Self, FeedError> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.thread_name("market-feed-io").enable_all();
        if let Some(threads) = options.io_threads {
            builder.worker_threads(threads.max(1));
        }
        let runtime = builder.build()?;

        let cancel = CancellationToken::new();
        let registry = StreamRegistry::new(
            factory,
            runtime.handle().clone(),
            options.registry,
            cancel.clone(),
        );

        Ok(Self {
            venue: options.venue,
            channels: options.channels,
            runtime: Mutex::new(Some(runtime)),
            registry,
            subscriptions: Mutex::new(HashMap::new()),
            cancel,
            shutdown_timeout: options.shutdown_timeout,
        })
    }

    /// Blocking sequence of quotes for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Configuration`] if the symbol cannot be resolved
    /// or no channel kinds are configured, before any stream starts.
    pub fn quotes(&self, symbol: &str) -> Result<QuoteStream, FeedError> {
        Ok(QuoteStream {
            symbol: symbol.to_string(),
            queues: self.queues_for(symbol)?,
        })
    }

    /// Blocking sequence of trades for `symbol`.
    ///
    /// # Errors
    ///
    /// See [`quotes`](Self::quotes).
    pub fn trades(&self, symbol: &str) -> Result<TradeStream, FeedError> {
        Ok(TradeStream {
            symbol: symbol.to_string(),
            queues: self.queues_for(symbol)?,
        })
    }

    /// Stream registry, for diagnostics.
    #[must_use]
    pub const fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Stop every stream and the I/O runtime. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.registry.shutdown();

        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(self.shutdown_timeout);
        }
        tracing::info!(venue = %self.venue, "Market feed shut down");
    }

    fn queues_for(&self, symbol: &str) -> Result<Arc<QueuePair>, FeedError> {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(queues) = subscriptions.get(symbol) {
            return Ok(Arc::clone(queues));
        }
        if self.cancel.is_cancelled() {
            return Err(FeedError::ShutDown);
        }

        let coin = to_venue_coin(symbol)?;
        let spec = ChannelSpec::new(&self.venue, coin, self.channels.iter().copied())?;
        let queues = self.registry.ensure_stream(symbol, &spec)?;
        subscriptions.insert(symbol.to_string(), Arc::clone(&queues));
        tracing::debug!(symbol, venue = %self.venue, "Subscribed");

        Ok(queues)
    }
}

impl Drop for MarketFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl MarketDataPort for MarketFeed {
    type Error = FeedError;
    type Quotes = QuoteStream;
    type Trades = TradeStream;

    fn subscribe_quotes(&self, symbol: &str) -> Result<QuoteStream, FeedError> {
        self.quotes(symbol)
    }

    fn subscribe_trades(&self, symbol: &str) -> Result<TradeStream, FeedError> {
        self.trades(symbol)
    }
}

// =============================================================================
// Sequences
// =============================================================================

/// Endless blocking sequence of quotes for one symbol.
///
/// Handles for the same symbol share one queue; each quote is delivered to
/// exactly one of them.
#[derive(Debug, Clone)]
pub struct QuoteStream {
    symbol: Symbol,
    queues: Arc<QueuePair>,
}

impl QuoteStream {
    /// Symbol this sequence serves.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Next quote, waiting at most `timeout`.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Quote> {
        self.queues.quotes().pop_timeout(timeout)
    }

    /// Next quote if one is queued.
    pub fn try_next(&mut self) -> Option<Quote> {
        self.queues.quotes().try_pop()
    }
}

impl Iterator for QuoteStream {
    type Item = Quote;

    /// Blocks until a quote is available. Never returns `None`.
    fn next(&mut self) -> Option<Quote> {
        Some(self.queues.quotes().pop())
    }
}

/// Endless blocking sequence of trades for one symbol.
///
/// Handles for the same symbol share one queue; each trade is delivered to
/// exactly one of them.
#[derive(Debug, Clone)]
pub struct TradeStream {
    symbol: Symbol,
    queues: Arc<QueuePair>,
}

impl TradeStream {
    /// Symbol this sequence serves.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Next trade, waiting at most `timeout`.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Trade> {
        self.queues.trades().pop_timeout(timeout)
    }

    /// Next trade if one is queued.
    pub fn try_next(&mut self) -> Option<Trade> {
        self.queues.trades().try_pop()
    }
}

impl Iterator for TradeStream {
    type Item = Trade;

    /// Blocks until a trade is available. Never returns `None`.
    fn next(&mut self) -> Option<Trade> {
        Some(self.queues.trades().pop())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{
        MockSessionFactory, Session, SessionError, SessionObserver,
    };
    use crate::domain::connection::ConnectionState;
    use crate::domain::streaming::AggressorSide;
    use crate::infrastructure::reconnect::ReconnectConfig;

    /// Pushes one quote and one trade, then idles.
    struct OneShotSession {
        queues: Arc<QueuePair>,
    }

    #[async_trait]
    impl Session for OneShotSession {
        async fn run(
            &self,
            observer: &dyn SessionObserver,
            cancel: &CancellationToken,
        ) -> Result<(), SessionError> {
            observer.on_state(ConnectionState::Subscribed);
            observer.on_state(ConnectionState::Streaming);
            self.queues.quotes().push(Quote {
                timestamp: 1,
                bid: 99.0,
                ask: 101.0,
                bid_size: 1.0,
                ask_size: 1.0,
            });
            self.queues.trades().push(Trade {
                timestamp: 2,
                price: 100.0,
                size: 0.5,
                side: AggressorSide::Buy,
            });
            cancel.cancelled().await;
            Ok(())
        }
    }

    fn one_shot_factory(starts: usize) -> MockSessionFactory {
        let mut factory = MockSessionFactory::new();
        factory
            .expect_create()
            .times(starts)
            .returning(|_, _, queues| Arc::new(OneShotSession { queues }) as Arc<dyn Session>);
        factory
    }

    /// Panics on its first run, then behaves like [`OneShotSession`].
    struct PanicsOnceSession {
        runs: AtomicUsize,
        inner: OneShotSession,
    }

    #[async_trait]
    impl Session for PanicsOnceSession {
        async fn run(
            &self,
            observer: &dyn SessionObserver,
            cancel: &CancellationToken,
        ) -> Result<(), SessionError> {
            if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("session bug");
            }
            self.inner.run(observer, cancel).await
        }
    }

    fn feed(factory: MockSessionFactory) -> MarketFeed {
        let mut options = FeedOptions::new("test");
        options.io_threads = Some(1);
        MarketFeed::new(Arc::new(factory), options).unwrap()
    }

    #[test]
    fn repeated_subscriptions_start_one_session() {
        let feed = feed(one_shot_factory(1));

        let _first = feed.subscribe_quotes("X").unwrap();
        let _second = feed.subscribe_quotes("X").unwrap();
        let _trades = feed.subscribe_trades("X").unwrap();

        assert_eq!(feed.registry().active_streams().len(), 1);
        feed.shutdown();
    }

    #[test]
    fn sequences_deliver_pushed_events() {
        let feed = feed(one_shot_factory(1));

        let mut quotes = feed.quotes("SOL-PERP").unwrap();
        let mut trades = feed.trades("SOL-PERP").unwrap();
        assert_eq!(quotes.symbol(), "SOL-PERP");

        let quote = quotes.next().unwrap();
        assert_eq!(quote.timestamp, 1);
        let trade = trades.next_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(trade.side, AggressorSide::Buy);

        assert!(quotes.try_next().is_none());
        assert!(trades.next_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn bad_symbol_fails_fast() {
        let feed = feed(one_shot_factory(0));

        let err = feed.quotes("-PERP").unwrap_err();
        assert!(matches!(
            err,
            FeedError::Configuration(ConfigurationError::UnresolvableSymbol(_))
        ));
        assert!(feed.registry().active_streams().is_empty());
    }

    #[test]
    fn subscribe_after_shutdown_is_rejected() {
        let feed = feed(one_shot_factory(0));
        feed.shutdown();
        feed.shutdown();

        assert!(matches!(feed.trades("SOL-PERP"), Err(FeedError::ShutDown)));
    }

    #[test]
    fn stream_survives_a_panicking_session() {
        let mut factory = MockSessionFactory::new();
        factory.expect_create().times(1).returning(|_, _, queues| {
            Arc::new(PanicsOnceSession {
                runs: AtomicUsize::new(0),
                inner: OneShotSession { queues },
            }) as Arc<dyn Session>
        });
        let mut options = FeedOptions::new("test");
        options.io_threads = Some(1);
        options.registry.reconnect =
            ReconnectConfig::new(Duration::from_millis(20), Duration::from_millis(100), 2.0, 0.0);
        let feed = MarketFeed::new(Arc::new(factory), options).unwrap();

        let mut quotes = feed.quotes("SOL-PERP").unwrap();
        let quote = quotes.next_timeout(Duration::from_secs(2));

        assert_eq!(quote.map(|q| q.timestamp), Some(1));
        let _again = feed.quotes("SOL-PERP").unwrap();
        assert_eq!(feed.registry().active_streams().len(), 1);
        feed.shutdown();
    }

    #[test]
    fn configured_channels_shape_the_stream() {
        let mut factory = MockSessionFactory::new();
        factory
            .expect_create()
            .withf(|_, spec, _| spec.channels() == [ChannelKind::Trades])
            .times(1)
            .returning(|_, _, queues| Arc::new(OneShotSession { queues }) as Arc<dyn Session>);
        let mut options = FeedOptions::new("test");
        options.io_threads = Some(1);
        options.channels = vec![ChannelKind::Trades];
        let feed = MarketFeed::new(Arc::new(factory), options).unwrap();

        assert!(feed.trades("SOL-PERP").is_ok());
        feed.shutdown();
    }

    #[test]
    fn empty_channel_list_fails_fast() {
        let mut options = FeedOptions::new("test");
        options.io_threads = Some(1);
        options.channels.clear();
        let feed = MarketFeed::new(Arc::new(one_shot_factory(0)), options).unwrap();

        assert!(matches!(
            feed.quotes("SOL-PERP"),
            Err(FeedError::Configuration(ConfigurationError::NoChannels(_)))
        ));
        assert!(feed.registry().active_streams().is_empty());
    }
}
