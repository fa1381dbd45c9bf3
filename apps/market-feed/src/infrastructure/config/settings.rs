//! Feed Configuration Settings
//!
//! Configuration types for the market feed, loaded from environment variables.

use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{FeedOptions, RegistryConfig};
use crate::domain::backpressure::DEFAULT_QUEUE_CAPACITY;
use crate::domain::subscription::{ChannelKind, ConfigurationError, Symbol};
use crate::infrastructure::bridge::BridgeConfig;
use crate::infrastructure::hyperliquid::{self, HeartbeatConfig, HyperliquidConfig, Network};
use crate::infrastructure::reconnect::ReconnectConfig;
use crate::infrastructure::synthetic;

/// Market data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Venue {
    /// Hyperliquid public WebSocket.
    #[default]
    Hyperliquid,
    /// Offline random walk.
    Synthetic,
}

impl Venue {
    /// Venue channel name used in stream tags.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hyperliquid => hyperliquid::VENUE,
            Self::Synthetic => synthetic::VENUE,
        }
    }
}

impl FromStr for Venue {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hyperliquid" => Ok(Self::Hyperliquid),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(ConfigError::InvalidValue {
                key: "MARKET_FEED_VENUE".to_string(),
                reason: format!("unknown venue '{other}' (expected hyperliquid or synthetic)"),
            }),
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Hyperliquid network.
    pub network: Network,
    /// Explicit WebSocket URL, overriding the network's.
    pub ws_url: Option<String>,
    /// Limit on opening the transport.
    pub connect_timeout: Duration,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_min: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let heartbeat = HeartbeatConfig::default();
        let reconnect = ReconnectConfig::default();
        Self {
            network: Network::default(),
            ws_url: None,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: heartbeat.ping_interval,
            heartbeat_timeout: heartbeat.pong_timeout,
            reconnect_delay_min: reconnect.min_delay,
            reconnect_delay_max: reconnect.max_delay,
            reconnect_delay_multiplier: reconnect.multiplier,
        }
    }
}

impl ConnectionSettings {
    fn validate_backoff(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: String| ConfigError::InvalidValue {
            key: key.to_string(),
            reason,
        };

        if self.reconnect_delay_min.is_zero() {
            return Err(invalid(
                "MARKET_FEED_RECONNECT_DELAY_MIN_MS",
                "must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_delay_max < self.reconnect_delay_min {
            return Err(invalid(
                "MARKET_FEED_RECONNECT_DELAY_MAX_SECS",
                format!(
                    "{:?} is below the minimum delay {:?}",
                    self.reconnect_delay_max, self.reconnect_delay_min
                ),
            ));
        }
        if !(self.reconnect_delay_multiplier >= 1.0 && self.reconnect_delay_multiplier.is_finite()) {
            return Err(invalid(
                "MARKET_FEED_RECONNECT_DELAY_MULTIPLIER",
                format!("{} is not a finite value of at least 1", self.reconnect_delay_multiplier),
            ));
        }
        Ok(())
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Market data source.
    pub venue: Venue,
    /// Symbols the binary subscribes at startup.
    pub symbols: Vec<Symbol>,
    /// Channel kinds every stream subscribes.
    pub channels: Vec<ChannelKind>,
    /// Capacity of each quote and trade queue.
    pub queue_capacity: usize,
    /// Connection settings.
    pub connection: ConnectionSettings,
    /// How long the bridge waits for in-flight work at shutdown.
    pub bridge_shutdown_timeout: Duration,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            venue: Venue::default(),
            symbols: vec!["SOL-PERP".to_string()],
            channels: ChannelKind::all().to_vec(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connection: ConnectionSettings::default(),
            bridge_shutdown_timeout: Duration::from_secs(1),
            metrics_port: 0,
        }
    }
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an enumerated variable has an unknown value, a
    /// list is empty, or the backoff settings are out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        let defaults = Self::default();
        let connection_defaults = ConnectionSettings::default();

        let venue = env.get("MARKET_FEED_VENUE").map_or(Ok(defaults.venue), |v| v.parse())?;

        let network = env
            .get("HL_NETWORK")
            .map_or(Ok(connection_defaults.network), |v| {
                v.parse().map_err(|reason| ConfigError::InvalidValue {
                    key: "HL_NETWORK".to_string(),
                    reason,
                })
            })?;

        let symbols = match env.get("MARKET_FEED_SYMBOLS") {
            Some(list) => {
                let symbols: Vec<Symbol> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if symbols.is_empty() {
                    return Err(ConfigError::EmptyValue("MARKET_FEED_SYMBOLS".to_string()));
                }
                symbols
            }
            None => defaults.symbols,
        };

        let channels = match env.get("MARKET_FEED_CHANNELS") {
            Some(list) => {
                let channels = list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ChannelKind::from_wire)
                    .collect::<Result<Vec<_>, _>>()?;
                if channels.is_empty() {
                    return Err(ConfigError::EmptyValue("MARKET_FEED_CHANNELS".to_string()));
                }
                channels
            }
            None => defaults.channels,
        };

        let connection = ConnectionSettings {
            network,
            ws_url: env.get("HL_WS_URL").filter(|url| !url.trim().is_empty()),
            connect_timeout: env.duration_secs(
                "MARKET_FEED_CONNECT_TIMEOUT_SECS",
                connection_defaults.connect_timeout,
            ),
            heartbeat_interval: env.duration_secs(
                "MARKET_FEED_HEARTBEAT_INTERVAL_SECS",
                connection_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.duration_secs(
                "MARKET_FEED_HEARTBEAT_TIMEOUT_SECS",
                connection_defaults.heartbeat_timeout,
            ),
            reconnect_delay_min: env.duration_millis(
                "MARKET_FEED_RECONNECT_DELAY_MIN_MS",
                connection_defaults.reconnect_delay_min,
            ),
            reconnect_delay_max: env.duration_secs(
                "MARKET_FEED_RECONNECT_DELAY_MAX_SECS",
                connection_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "MARKET_FEED_RECONNECT_DELAY_MULTIPLIER",
                connection_defaults.reconnect_delay_multiplier,
            ),
        };
        connection.validate_backoff()?;

        Ok(Self {
            venue,
            symbols,
            channels,
            queue_capacity: env.parse("MARKET_FEED_QUEUE_CAPACITY", defaults.queue_capacity),
            connection,
            bridge_shutdown_timeout: env.duration_secs(
                "MARKET_FEED_BRIDGE_SHUTDOWN_TIMEOUT_SECS",
                defaults.bridge_shutdown_timeout,
            ),
            metrics_port: env.parse("MARKET_FEED_METRICS_PORT", defaults.metrics_port),
        })
    }

    /// Settings for Hyperliquid sessions.
    #[must_use]
    pub fn hyperliquid(&self) -> HyperliquidConfig {
        let connection = &self.connection;
        HyperliquidConfig {
            url: connection
                .ws_url
                .clone()
                .unwrap_or_else(|| connection.network.ws_url().to_string()),
            connect_timeout: connection.connect_timeout,
            heartbeat: HeartbeatConfig::new(
                connection.heartbeat_interval,
                connection.heartbeat_timeout,
            ),
        }
    }

    /// Backoff applied by every stream supervisor.
    #[must_use]
    pub const fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig::new(
            self.connection.reconnect_delay_min,
            self.connection.reconnect_delay_max,
            self.connection.reconnect_delay_multiplier,
            0.0,
        )
    }

    /// Options for the market feed service.
    #[must_use]
    pub fn feed_options(&self) -> FeedOptions {
        let mut options = FeedOptions::new(self.venue.as_str());
        options.channels.clone_from(&self.channels);
        options.registry = RegistryConfig {
            queue_capacity: self.queue_capacity,
            reconnect: self.reconnect(),
        };
        options
    }

    /// Settings for the async bridge.
    #[must_use]
    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            shutdown_timeout: self.bridge_shutdown_timeout,
            ..BridgeConfig::default()
        }
    }

    /// Address of the metrics endpoint, if enabled.
    #[must_use]
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        (self.metrics_port != 0)
            .then(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.metrics_port)))
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unrecognized value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong.
        reason: String,
    },
    /// Channel list names an unsupported channel.
    #[error(transparent)]
    Channel(#[from] ConfigurationError),
}

/// Variable lookup with fall-back-to-default numeric parsing.
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<FeedConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        FeedConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.venue, Venue::Hyperliquid);
        assert_eq!(config.symbols, vec!["SOL-PERP"]);
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.connection.network, Network::Mainnet);
        assert_eq!(config.connection.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(config.connection.heartbeat_timeout, Duration::from_secs(40));
        assert_eq!(config.connection.reconnect_delay_min, Duration::from_secs(1));
        assert_eq!(config.connection.reconnect_delay_max, Duration::from_secs(30));
        assert!(config.metrics_addr().is_none());
        assert_eq!(config.hyperliquid().url, hyperliquid::MAINNET_WS_URL);
    }

    #[test_case("hyperliquid", Venue::Hyperliquid ; "hyperliquid")]
    #[test_case("SYNTHETIC", Venue::Synthetic ; "case insensitive")]
    #[test_case(" synthetic ", Venue::Synthetic ; "trimmed")]
    fn venue_parsing(raw: &str, expected: Venue) {
        assert_eq!(raw.parse::<Venue>().unwrap(), expected);
    }

    #[test]
    fn unknown_venue_is_rejected() {
        let err = load(&[("MARKET_FEED_VENUE", "binance")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "MARKET_FEED_VENUE"));
    }

    #[test]
    fn unknown_network_is_rejected() {
        let err = load(&[("HL_NETWORK", "devnet")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "HL_NETWORK"));
    }

    #[test]
    fn symbols_are_split_and_trimmed() {
        let config = load(&[("MARKET_FEED_SYMBOLS", " SOL-PERP, BTC-PERP ,,ETH-PERP")]).unwrap();
        assert_eq!(config.symbols, vec!["SOL-PERP", "BTC-PERP", "ETH-PERP"]);
    }

    #[test]
    fn empty_symbol_list_is_rejected() {
        assert!(matches!(
            load(&[("MARKET_FEED_SYMBOLS", " , ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn testnet_and_url_override() {
        let config = load(&[("HL_NETWORK", "testnet")]).unwrap();
        assert_eq!(config.hyperliquid().url, hyperliquid::TESTNET_WS_URL);

        let config = load(&[("HL_NETWORK", "testnet"), ("HL_WS_URL", "ws://127.0.0.1:9000")]).unwrap();
        assert_eq!(config.hyperliquid().url, "ws://127.0.0.1:9000");
    }

    #[test]
    fn numeric_overrides_and_bad_numbers() {
        let config = load(&[
            ("MARKET_FEED_QUEUE_CAPACITY", "64"),
            ("MARKET_FEED_RECONNECT_DELAY_MIN_MS", "250"),
            ("MARKET_FEED_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("MARKET_FEED_METRICS_PORT", "9100"),
            ("MARKET_FEED_HEARTBEAT_INTERVAL_SECS", "not-a-number"),
        ])
        .unwrap();

        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.reconnect().min_delay, Duration::from_millis(250));
        assert!((config.reconnect().multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.metrics_addr().map(|a| a.port()), Some(9100));
        assert_eq!(config.connection.heartbeat_interval, Duration::from_secs(20));
    }

    #[test]
    fn feed_options_carry_venue_and_capacity() {
        let config = load(&[
            ("MARKET_FEED_VENUE", "synthetic"),
            ("MARKET_FEED_QUEUE_CAPACITY", "32"),
        ])
        .unwrap();
        let options = config.feed_options();
        assert_eq!(options.venue, "synthetic");
        assert_eq!(options.registry.queue_capacity, 32);
    }

    #[test]
    fn channel_list_is_parsed() {
        let config = load(&[("MARKET_FEED_CHANNELS", " trades ")]).unwrap();
        assert_eq!(config.channels, vec![ChannelKind::Trades]);
        assert_eq!(config.feed_options().channels, vec![ChannelKind::Trades]);

        let config = load(&[]).unwrap();
        assert_eq!(config.channels, vec![ChannelKind::L2Book, ChannelKind::Trades]);
    }

    #[test]
    fn unsupported_channel_is_rejected() {
        let err = load(&[("MARKET_FEED_CHANNELS", "l2Book,candle")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Channel(ConfigurationError::UnsupportedChannel(name)) if name == "candle"
        ));
        assert!(matches!(
            load(&[("MARKET_FEED_CHANNELS", ",")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test_case(&[("MARKET_FEED_RECONNECT_DELAY_MIN_MS", "0")], "MARKET_FEED_RECONNECT_DELAY_MIN_MS" ; "zero min")]
    #[test_case(
        &[("MARKET_FEED_RECONNECT_DELAY_MIN_MS", "5000"), ("MARKET_FEED_RECONNECT_DELAY_MAX_SECS", "2")],
        "MARKET_FEED_RECONNECT_DELAY_MAX_SECS" ;
        "max below min"
    )]
    #[test_case(&[("MARKET_FEED_RECONNECT_DELAY_MULTIPLIER", "0.5")], "MARKET_FEED_RECONNECT_DELAY_MULTIPLIER" ; "shrinking multiplier")]
    #[test_case(&[("MARKET_FEED_RECONNECT_DELAY_MULTIPLIER", "NaN")], "MARKET_FEED_RECONNECT_DELAY_MULTIPLIER" ; "nan multiplier")]
    fn out_of_range_backoff_is_rejected(pairs: &[(&str, &str)], bad_key: &str) {
        let err = load(pairs).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == bad_key));
    }
}
