//! Market Feed Binary
//!
//! Subscribes the configured symbols and logs their quotes and trades until
//! interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_FEED_VENUE`: hyperliquid | synthetic (default: hyperliquid)
//! - `MARKET_FEED_SYMBOLS`: Comma-separated symbols (default: SOL-PERP)
//! - `MARKET_FEED_CHANNELS`: Comma-separated wire channels (default: l2Book,trades)
//! - `HL_NETWORK`: mainnet | testnet (default: mainnet)
//! - `HL_WS_URL`: WebSocket URL override
//! - `MARKET_FEED_QUEUE_CAPACITY`: Per-symbol queue capacity (default: 10000)
//! - `MARKET_FEED_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Extra log directives

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use market_feed::application::ports::SessionFactory;
use market_feed::infrastructure::bridge::AsyncBridge;
use market_feed::infrastructure::hyperliquid::HyperliquidSessionFactory;
use market_feed::infrastructure::synthetic::SyntheticSessionFactory;
use market_feed::infrastructure::telemetry;
use market_feed::{FeedConfig, MarketFeed, Venue, init_metrics};
use tokio::signal;

/// How long consumer threads wait before re-checking the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Market Feed");

    let config = FeedConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let _metrics_handle = init_metrics(config.metrics_addr())?;

    let factory: Arc<dyn SessionFactory> = match config.venue {
        Venue::Hyperliquid => Arc::new(HyperliquidSessionFactory::new(config.hyperliquid())),
        Venue::Synthetic => Arc::new(SyntheticSessionFactory::default()),
    };
    let feed = MarketFeed::new(factory, config.feed_options())?;
    let bridge = AsyncBridge::new(config.bridge())?;

    let stop = Arc::new(AtomicBool::new(false));
    let mut consumers = Vec::new();
    for symbol in &config.symbols {
        consumers.extend(spawn_consumers(&feed, symbol, &stop)?);
    }

    tracing::info!(
        symbols = config.symbols.len(),
        venue = config.venue.as_str(),
        "Market feed running"
    );

    bridge.await_result(await_shutdown)?;

    stop.store(true, Ordering::Relaxed);
    for consumer in consumers {
        if consumer.join().is_err() {
            tracing::error!("Consumer thread panicked");
        }
    }

    feed.shutdown();
    bridge.shutdown();

    tracing::info!("Market Feed stopped");
    Ok(())
}

/// Start one quote logger and one trade logger for `symbol`.
fn spawn_consumers(
    feed: &MarketFeed,
    symbol: &str,
    stop: &Arc<AtomicBool>,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut quotes = feed.quotes(symbol)?;
    let quote_stop = Arc::clone(stop);
    let quote_logger = thread::Builder::new()
        .name(format!("quotes-{symbol}"))
        .spawn(move || {
            while !quote_stop.load(Ordering::Relaxed) {
                if let Some(quote) = quotes.next_timeout(POLL_INTERVAL) {
                    tracing::info!(
                        symbol = quotes.symbol(),
                        bid = quote.bid,
                        ask = quote.ask,
                        mid = quote.mid(),
                        ts = quote.timestamp,
                        "Quote"
                    );
                }
            }
        })?;

    let mut trades = feed.trades(symbol)?;
    let trade_stop = Arc::clone(stop);
    let trade_logger = thread::Builder::new()
        .name(format!("trades-{symbol}"))
        .spawn(move || {
            while !trade_stop.load(Ordering::Relaxed) {
                if let Some(trade) = trades.next_timeout(POLL_INTERVAL) {
                    tracing::info!(
                        symbol = trades.symbol(),
                        price = trade.price,
                        size = trade.size,
                        side = trade.side.as_str(),
                        ts = trade.timestamp,
                        "Trade"
                    );
                }
            }
        })?;

    Ok(vec![quote_logger, trade_logger])
}

fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

fn log_config(config: &FeedConfig) {
    tracing::info!(
        venue = config.venue.as_str(),
        network = ?config.connection.network,
        symbols = %config.symbols.join(","),
        queue_capacity = config.queue_capacity,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    Ok(())
}
