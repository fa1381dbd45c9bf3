//! Hyperliquid WebSocket Message Types
//!
//! Wire format types for the Hyperliquid streaming API. These map directly to
//! the JSON schemas the venue sends and accepts.
//!
//! # Outbound
//!
//! - `SubscribeRequest`: `{"method":"subscribe","subscription":{"type":"l2Book","coin":"SOL"}}`
//! - `PingRequest`: `{"method":"ping"}`
//!
//! # Inbound
//!
//! Every frame is an envelope `{"channel": <name>, "data": <payload>}`:
//!
//! - `subscriptionResponse`: subscribe acknowledgment
//! - `pong`: reply to an application-level ping
//! - `error`: venue-side error text
//! - `l2Book`: order book snapshot (`L2BookData`)
//! - `trades`: list of trade prints (`WsTrade`)
//!
//! # References
//!
//! - [WebSocket subscriptions](https://hyperliquid.gitbook.io/hyperliquid-docs/for-developers/api/websocket/subscriptions)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::subscription::ChannelKind;

// =============================================================================
// Outbound Messages
// =============================================================================

/// Subscription target inside a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Channel type (`l2Book`, `trades`).
    #[serde(rename = "type")]
    pub channel: String,

    /// Venue coin (e.g. `SOL`).
    pub coin: String,
}

/// Subscribe control message.
///
/// # Wire Format (JSON)
/// ```json
/// {"method": "subscribe", "subscription": {"type": "trades", "coin": "SOL"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Always `subscribe`.
    pub method: String,

    /// What to subscribe to.
    pub subscription: Subscription,
}

impl SubscribeRequest {
    /// Build a subscribe request for one channel kind and coin.
    #[must_use]
    pub fn new(kind: ChannelKind, coin: &str) -> Self {
        Self {
            method: "subscribe".to_string(),
            subscription: Subscription {
                channel: kind.as_str().to_string(),
                coin: coin.to_string(),
            },
        }
    }
}

/// Application-level keep-alive.
///
/// # Wire Format (JSON)
/// ```json
/// {"method": "ping"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    /// Always `ping`.
    pub method: String,
}

impl Default for PingRequest {
    fn default() -> Self {
        Self {
            method: "ping".to_string(),
        }
    }
}

// =============================================================================
// Inbound Envelope
// =============================================================================

/// Channel names of control frames.
pub mod channels {
    /// Subscribe acknowledgment.
    pub const SUBSCRIPTION_RESPONSE: &str = "subscriptionResponse";
    /// Ping reply.
    pub const PONG: &str = "pong";
    /// Venue error.
    pub const ERROR: &str = "error";
    /// Order book.
    pub const L2_BOOK: &str = "l2Book";
    /// Trade tape.
    pub const TRADES: &str = "trades";
}

/// Envelope of every inbound frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    /// Channel name.
    pub channel: String,

    /// Channel payload; absent on some control frames.
    #[serde(default)]
    pub data: serde_json::Value,
}

// =============================================================================
// Order Book
// =============================================================================

/// One price level of the book.
///
/// # Wire Format (JSON)
/// ```json
/// {"px": "100.0", "sz": "1.5", "n": 3}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Price (decimal string on the wire).
    pub px: Decimal,

    /// Aggregate size at this price.
    pub sz: Decimal,

    /// Number of orders at this level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

/// Order book snapshot.
///
/// `levels` is `[bids, asks]`, each sorted best first.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "coin": "SOL",
///   "levels": [[{"px":"100.0","sz":"1","n":1}], [{"px":"100.2","sz":"2","n":1}]],
///   "time": 1700000000000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2BookData {
    /// Venue coin.
    pub coin: String,

    /// `[bids, asks]`.
    pub levels: Vec<Vec<BookLevel>>,

    /// Snapshot time in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

// =============================================================================
// Trades
// =============================================================================

/// One trade print.
///
/// # Wire Format (JSON)
/// ```json
/// {"coin":"SOL","side":"B","px":"100.1","sz":"0.5","time":1700000000000,"hash":"0x..","tid":1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsTrade {
    /// Venue coin.
    pub coin: String,

    /// Aggressor side code (`B` buy, `A`/`S` sell).
    pub side: String,

    /// Execution price.
    pub px: Decimal,

    /// Executed size.
    pub sz: Decimal,

    /// Execution time in milliseconds since the epoch.
    pub time: i64,

    /// Transaction hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Trade id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<u64>,
}
