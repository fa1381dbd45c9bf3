//! Market Data Streaming Types
//!
//! Core domain types for market data: quotes and trades.
//! These types are codec-agnostic and represent the canonical
//! internal representation of venue market data.

use serde::{Deserialize, Serialize};

/// Aggressor side of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggressorSide {
    /// The taker bought (lifted the offer).
    Buy,
    /// The taker sold (hit the bid).
    Sell,
}

impl AggressorSide {
    /// Map a venue side code to an aggressor side.
    ///
    /// `"B"`, `"Buy"` and `"buy"` are buys. Every other code, including
    /// `"S"` and `"Sell"`, is a sell.
    #[must_use]
    pub fn from_venue_code(code: &str) -> Self {
        match code {
            "B" | "Buy" | "buy" => Self::Buy,
            _ => Self::Sell,
        }
    }

    /// Lowercase name, as used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// Best bid/ask snapshot.
///
/// Only built when the source update carries both a bid and an ask level.
/// Bid and ask are taken as the venue reports them; no `bid <= ask` check is
/// applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Best bid price.
    pub bid: f64,
    /// Best ask price.
    pub ask: f64,
    /// Size at the best bid.
    pub bid_size: f64,
    /// Size at the best ask.
    pub ask_size: f64,
}

impl Quote {
    /// Mid price.
    #[must_use]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Ask minus bid. May be negative on a crossed venue book.
    #[must_use]
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// A single executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Execution price.
    pub price: f64,
    /// Executed size.
    pub size: f64,
    /// Side of the aggressor.
    pub side: AggressorSide,
}

/// Kind of market data event, used to label queues and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Top-of-book quotes.
    Quote,
    /// Trade prints.
    Trade,
}

impl EventKind {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Trade => "trade",
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("B", AggressorSide::Buy ; "short buy code")]
    #[test_case("Buy", AggressorSide::Buy ; "capitalized buy")]
    #[test_case("buy", AggressorSide::Buy ; "lowercase buy")]
    #[test_case("S", AggressorSide::Sell ; "short sell code")]
    #[test_case("Sell", AggressorSide::Sell ; "capitalized sell")]
    #[test_case("A", AggressorSide::Sell ; "unknown code is sell")]
    fn side_from_venue_code(code: &str, expected: AggressorSide) {
        assert_eq!(AggressorSide::from_venue_code(code), expected);
    }

    #[test]
    fn quote_mid_and_spread() {
        let quote = Quote {
            timestamp: 1,
            bid: 100.0,
            ask: 100.5,
            bid_size: 1.0,
            ask_size: 2.0,
        };
        assert!((quote.mid() - 100.25).abs() < 1e-9);
        assert!((quote.spread() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn crossed_quote_is_kept_as_is() {
        let quote = Quote {
            timestamp: 1,
            bid: 101.0,
            ask: 100.0,
            bid_size: 1.0,
            ask_size: 1.0,
        };
        assert!(quote.spread() < 0.0);
    }

    #[test]
    fn side_serializes_lowercase() {
        let json = serde_json::to_string(&AggressorSide::Buy).unwrap();
        assert_eq!(json, "\"buy\"");
    }
}
