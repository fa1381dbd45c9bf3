//! Subscription Identity Types
//!
//! Domain types identifying one logical venue subscription.
//!
//! # Design
//!
//! A stream is identified by a [`StreamTag`]: the internal symbol the
//! consumer asked for plus the venue channel it is served from. The tag is
//! the deduplication key of the stream registry and the name used for the
//! session in logs.
//!
//! A [`ChannelSpec`] describes what a session subscribes to on the wire:
//! the venue, the venue's coin name, and the channel kinds to request.

use std::fmt;

/// Internal instrument symbol (e.g. `SOL-PERP`).
pub type Symbol = String;

/// Suffix stripped from internal perpetual symbols to get the venue coin.
const PERP_SUFFIX: &str = "-PERP";

// =============================================================================
// Errors
// =============================================================================

/// Subscription configuration errors.
///
/// Raised before any worker starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Symbol could not be mapped to a venue instrument.
    #[error("unresolvable symbol: {0:?}")]
    UnresolvableSymbol(String),

    /// Channel kind is not supported by the venue adapter.
    #[error("unsupported channel: {0}")]
    UnsupportedChannel(String),

    /// Channel spec requests no channels.
    #[error("channel spec for {0} requests no channels")]
    NoChannels(String),
}

// =============================================================================
// Channel Kinds
// =============================================================================

/// Venue channel families the adapters understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKind {
    /// Order book; the top level of each side becomes a quote.
    L2Book,
    /// Trade tape.
    Trades,
}

impl ChannelKind {
    /// Wire name of the channel.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::L2Book => "l2Book",
            Self::Trades => "trades",
        }
    }

    /// Parse a wire channel name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnsupportedChannel`] for unknown names.
    pub fn from_wire(name: &str) -> Result<Self, ConfigurationError> {
        match name {
            "l2Book" => Ok(Self::L2Book),
            "trades" => Ok(Self::Trades),
            other => Err(ConfigurationError::UnsupportedChannel(other.to_string())),
        }
    }

    /// Both channel kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::L2Book, Self::Trades]
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Symbol Mapping
// =============================================================================

/// Map an internal symbol to the venue coin.
///
/// Upper-cases the symbol and strips a `-PERP` suffix: `sol-perp` → `SOL`.
///
/// # Errors
///
/// Returns [`ConfigurationError::UnresolvableSymbol`] if the symbol is empty,
/// contains whitespace, or is nothing but the suffix.
pub fn to_venue_coin(symbol: &str) -> Result<String, ConfigurationError> {
    let upper = symbol.trim().to_uppercase();
    if upper.is_empty() || symbol.chars().any(char::is_whitespace) {
        return Err(ConfigurationError::UnresolvableSymbol(symbol.to_string()));
    }

    let coin = upper.strip_suffix(PERP_SUFFIX).unwrap_or(&upper);
    if coin.is_empty() {
        return Err(ConfigurationError::UnresolvableSymbol(symbol.to_string()));
    }

    Ok(coin.to_string())
}

// =============================================================================
// Channel Spec
// =============================================================================

/// What one transport session subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    venue: String,
    coin: String,
    channels: Vec<ChannelKind>,
}

impl ChannelSpec {
    /// Create a spec from explicit parts.
    ///
    /// Channel kinds are deduplicated and sorted so equal requests produce
    /// equal specs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoChannels`] when `channels` is empty.
    pub fn new(
        venue: impl Into<String>,
        coin: impl Into<String>,
        channels: impl IntoIterator<Item = ChannelKind>,
    ) -> Result<Self, ConfigurationError> {
        let venue = venue.into();
        let coin = coin.into();
        let mut channels: Vec<ChannelKind> = channels.into_iter().collect();
        channels.sort_unstable();
        channels.dedup();

        if channels.is_empty() {
            return Err(ConfigurationError::NoChannels(format!("{venue}:{coin}")));
        }

        Ok(Self {
            venue,
            coin,
            channels,
        })
    }

    /// Default spec for a symbol: quotes and trades on one connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol cannot be mapped to a venue coin.
    pub fn for_symbol(venue: &str, symbol: &str) -> Result<Self, ConfigurationError> {
        let coin = to_venue_coin(symbol)?;
        Self::new(venue, coin, ChannelKind::all().iter().copied())
    }

    /// Venue name.
    #[must_use]
    pub fn venue(&self) -> &str {
        &self.venue
    }

    /// Venue coin.
    #[must_use]
    pub fn coin(&self) -> &str {
        &self.coin
    }

    /// Channel kinds to subscribe.
    #[must_use]
    pub fn channels(&self) -> &[ChannelKind] {
        &self.channels
    }

    /// Whether the spec includes `kind`.
    #[must_use]
    pub fn includes(&self, kind: ChannelKind) -> bool {
        self.channels.contains(&kind)
    }

    /// Venue channel name used in stream tags (`venue:coin`).
    #[must_use]
    pub fn channel_name(&self) -> String {
        format!("{}:{}", self.venue, self.coin)
    }
}

// =============================================================================
// Stream Tag
// =============================================================================

/// Identity of one running stream: internal symbol plus venue channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamTag {
    symbol: Symbol,
    channel: String,
}

impl StreamTag {
    /// Build a tag for a symbol served by `spec`.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, spec: &ChannelSpec) -> Self {
        Self {
            symbol: symbol.into(),
            channel: spec.channel_name(),
        }
    }

    /// Internal symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Venue channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.symbol, self.channel)
    }
}

// =============================================================================
// Tests
// =============================================================================
