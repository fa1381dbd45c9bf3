//! Configuration Module
//!
//! Environment-driven configuration for the feed service and binary.

mod settings;

pub use settings::{ConfigError, ConnectionSettings, FeedConfig, Venue};
