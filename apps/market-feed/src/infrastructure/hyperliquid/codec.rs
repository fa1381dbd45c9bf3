//! Stream Codec Module
//!
//! Decodes Hyperliquid WebSocket frames into typed venue messages and
//! converts book and trade payloads into domain quotes and trades.
//!
//! There is exactly one schema per channel. A payload that does not match it
//! is a [`CodecError`], never a guess: the caller drops the frame and keeps
//! the session alive.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::messages::{InboundFrame, L2BookData, WsTrade, channels};
use crate::domain::streaming::{AggressorSide, Quote, Trade};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload has a shape this codec does not support.
    #[error("unsupported schema for {channel}: {detail}")]
    UnsupportedSchema {
        /// Channel the payload arrived on.
        channel: String,
        /// What was wrong.
        detail: String,
    },

    /// Decimal value cannot be represented as `f64`.
    #[error("invalid number: {0}")]
    InvalidNumber(Decimal),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum VenueMessage {
    /// Subscribe acknowledgment.
    SubscriptionResponse,
    /// Reply to an application-level ping.
    Pong,
    /// Venue-side error text.
    Error(String),
    /// Order book snapshot.
    Book(L2BookData),
    /// Trade prints.
    Trades(Vec<WsTrade>),
    /// Channel this codec does not handle.
    Unknown(String),
}

impl VenueMessage {
    /// Whether this frame carries market data.
    #[must_use]
    pub const fn is_market_data(&self) -> bool {
        matches!(self, Self::Book(_) | Self::Trades(_))
    }
}

/// JSON codec for the Hyperliquid stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a `{channel, data}` envelope or
    /// a market data payload does not match its schema.
    pub fn decode(&self, text: &str) -> Result<VenueMessage, CodecError> {
        let frame: InboundFrame = serde_json::from_str(text)?;

        let message = match frame.channel.as_str() {
            channels::SUBSCRIPTION_RESPONSE => VenueMessage::SubscriptionResponse,
            channels::PONG => VenueMessage::Pong,
            channels::ERROR => VenueMessage::Error(
                frame
                    .data
                    .as_str()
                    .map_or_else(|| frame.data.to_string(), str::to_string),
            ),
            channels::L2_BOOK => VenueMessage::Book(serde_json::from_value(frame.data)?),
            channels::TRADES => VenueMessage::Trades(serde_json::from_value(frame.data)?),
            other => VenueMessage::Unknown(other.to_string()),
        };

        Ok(message)
    }

    /// Encode a value to JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

impl L2BookData {
    /// Best bid/ask of this snapshot.
    ///
    /// Returns `Ok(None)` when either side is empty. `fallback_ts` stamps
    /// snapshots that carry no `time`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedSchema`] unless `levels` is exactly
    /// `[bids, asks]`.
    pub fn top_of_book(&self, fallback_ts: i64) -> Result<Option<Quote>, CodecError> {
        let [bids, asks] = self.levels.as_slice() else {
            return Err(CodecError::UnsupportedSchema {
                channel: channels::L2_BOOK.to_string(),
                detail: format!("expected [bids, asks], got {} sides", self.levels.len()),
            });
        };

        let (Some(best_bid), Some(best_ask)) = (bids.first(), asks.first()) else {
            return Ok(None);
        };

        Ok(Some(Quote {
            timestamp: self.time.unwrap_or(fallback_ts),
            bid: to_f64(best_bid.px)?,
            ask: to_f64(best_ask.px)?,
            bid_size: to_f64(best_bid.sz)?,
            ask_size: to_f64(best_ask.sz)?,
        }))
    }
}

impl WsTrade {
    /// Convert to a domain trade.
    ///
    /// # Errors
    ///
    /// Returns an error if price or size cannot be represented as `f64`.
    pub fn to_trade(&self) -> Result<Trade, CodecError> {
        Ok(Trade {
            timestamp: self.time,
            price: to_f64(self.px)?,
            size: to_f64(self.sz)?,
            side: AggressorSide::from_venue_code(&self.side),
        })
    }
}

fn to_f64(value: Decimal) -> Result<f64, CodecError> {
    value.to_f64().ok_or(CodecError::InvalidNumber(value))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn decode_book_frame_to_quote() {
        let codec = JsonCodec::new();
        let json = r#"{"channel":"l2Book","data":{"coin":"SOL","levels":[[{"px":"100.0","sz":"1"}],[{"px":"100.2","sz":"2"}]],"time":1000}}"#;

        let VenueMessage::Book(book) = codec.decode(json).unwrap() else {
            panic!("expected Book message");
        };
        assert_eq!(book.coin, "SOL");

        let quote = book.top_of_book(0).unwrap().unwrap();
        assert_eq!(quote.timestamp, 1000);
        assert!(approx(quote.bid, 100.0));
        assert!(approx(quote.ask, 100.2));
        assert!(approx(quote.bid_size, 1.0));
        assert!(approx(quote.ask_size, 2.0));
    }

    #[test]
    fn book_uses_first_level_of_each_side() {
        let codec = JsonCodec::new();
        let json = r#"{"channel":"l2Book","data":{"coin":"BTC","levels":[
            [{"px":"50000","sz":"1","n":2},{"px":"49999","sz":"5","n":1}],
            [{"px":"50001","sz":"3","n":1},{"px":"50002","sz":"9","n":4}]
        ],"time":7}}"#;

        let VenueMessage::Book(book) = codec.decode(json).unwrap() else {
            panic!("expected Book message");
        };
        let quote = book.top_of_book(0).unwrap().unwrap();
        assert!(approx(quote.bid, 50000.0));
        assert!(approx(quote.ask, 50001.0));
        assert!(approx(quote.ask_size, 3.0));
    }

    #[test]
    fn one_sided_book_yields_no_quote() {
        let book = L2BookData {
            coin: "SOL".to_string(),
            levels: vec![vec![], vec![]],
            time: Some(1),
        };
        assert!(book.top_of_book(0).unwrap().is_none());
    }

    #[test]
    fn book_without_time_uses_fallback() {
        let codec = JsonCodec::new();
        let json = r#"{"channel":"l2Book","data":{"coin":"SOL","levels":[[{"px":"1","sz":"1"}],[{"px":"2","sz":"1"}]]}}"#;
        let VenueMessage::Book(book) = codec.decode(json).unwrap() else {
            panic!("expected Book message");
        };
        assert_eq!(book.top_of_book(99).unwrap().unwrap().timestamp, 99);
    }

    #[test]
    fn book_with_wrong_side_count_is_unsupported() {
        let book = L2BookData {
            coin: "SOL".to_string(),
            levels: vec![vec![]],
            time: None,
        };
        assert!(matches!(
            book.top_of_book(0),
            Err(CodecError::UnsupportedSchema { .. })
        ));
    }

    #[test]
    fn legacy_bids_asks_object_is_rejected() {
        let codec = JsonCodec::new();
        let json = r#"{"channel":"l2Book","data":{"coin":"SOL","levels":{"bids":[["1","1"]],"asks":[["2","1"]]}}}"#;
        assert!(matches!(codec.decode(json), Err(CodecError::Json(_))));
    }

    #[test_case("B", AggressorSide::Buy ; "buy code")]
    #[test_case("S", AggressorSide::Sell ; "sell code")]
    #[test_case("Sell", AggressorSide::Sell ; "sell word")]
    #[test_case("A", AggressorSide::Sell ; "ask side code")]
    fn decode_trade_side(code: &str, expected: AggressorSide) {
        let codec = JsonCodec::new();
        let json = format!(
            r#"{{"channel":"trades","data":[{{"coin":"SOL","side":"{code}","px":"100.1","sz":"0.5","time":42}}]}}"#
        );

        let VenueMessage::Trades(trades) = codec.decode(&json).unwrap() else {
            panic!("expected Trades message");
        };
        assert_eq!(trades.len(), 1);

        let trade = trades[0].to_trade().unwrap();
        assert_eq!(trade.side, expected);
        assert_eq!(trade.timestamp, 42);
        assert!(approx(trade.price, 100.1));
        assert!(approx(trade.size, 0.5));
    }

    #[test]
    fn control_frames() {
        let codec = JsonCodec::new();
        assert_eq!(
            codec
                .decode(r#"{"channel":"subscriptionResponse","data":{"method":"subscribe"}}"#)
                .unwrap(),
            VenueMessage::SubscriptionResponse
        );
        assert_eq!(
            codec.decode(r#"{"channel":"pong"}"#).unwrap(),
            VenueMessage::Pong
        );
        assert_eq!(
            codec
                .decode(r#"{"channel":"error","data":"Invalid subscription"}"#)
                .unwrap(),
            VenueMessage::Error("Invalid subscription".to_string())
        );
    }

    #[test]
    fn unknown_channel_is_not_an_error() {
        let codec = JsonCodec::new();
        let message = codec
            .decode(r#"{"channel":"candle","data":{"s":"SOL"}}"#)
            .unwrap();
        assert_eq!(message, VenueMessage::Unknown("candle".to_string()));
        assert!(!message.is_market_data());
    }

    #[test]
    fn malformed_frames_are_errors() {
        let codec = JsonCodec::new();
        assert!(codec.decode("not json").is_err());
        assert!(codec.decode(r#"{"data":{}}"#).is_err());
        assert!(codec
            .decode(r#"{"channel":"trades","data":{"coin":"SOL"}}"#)
            .is_err());
    }

    #[test]
    fn encode_round_trips_through_serde() {
        let codec = JsonCodec::new();
        let json = codec
            .encode(&super::super::messages::PingRequest::default())
            .unwrap();
        assert!(json.contains("ping"));
    }
}
