//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with venues and execution threads.

/// Port interfaces for venue sessions, market data and execution paths.
pub mod ports;

/// Application services for stream deduplication and market data delivery.
pub mod services;
