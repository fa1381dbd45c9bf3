//! Hyperliquid WebSocket Adapter
//!
//! Streams top-of-book quotes (`l2Book`) and trades (`trades`) for perpetual
//! markets over one WebSocket connection per stream tag (JSON codec).

pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod session;

pub use codec::{CodecError, JsonCodec, VenueMessage};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::*;
pub use session::{
    HyperliquidConfig, HyperliquidSession, HyperliquidSessionFactory, MAINNET_WS_URL, Network,
    TESTNET_WS_URL, VENUE,
};
