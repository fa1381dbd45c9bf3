//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Single-thread gateway from synchronous callers to async operations.
pub mod bridge;

/// Configuration loading.
pub mod config;

/// Hyperliquid WebSocket session adapter.
pub mod hyperliquid;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Backoff policy and per-stream supervision.
pub mod reconnect;

/// Offline synthetic venue.
pub mod synthetic;

/// OpenTelemetry tracing integration.
pub mod telemetry;
