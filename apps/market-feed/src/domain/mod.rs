//! Domain Layer - Core market data types.
//!
//! This layer contains the core domain types for market data ingestion
//! with no I/O. All types here are plain Rust with serialization support.

/// Drop-oldest queues between venue sessions and consumers.
pub mod backpressure;

/// Session connection lifecycle.
pub mod connection;

/// Market data types (quotes, trades).
pub mod streaming;

/// Stream identity and channel specification.
pub mod subscription;
