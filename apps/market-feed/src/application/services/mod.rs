//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `StreamRegistry`: Starts at most one supervised session per stream tag
//! - `MarketFeed`: Blocking quote and trade sequences for synchronous callers

mod feed;
mod registry;

pub use feed::{FeedError, FeedOptions, MarketFeed, QuoteStream, TradeStream};
pub use registry::{RegistryConfig, StreamRegistry};
