//! Connection Lifecycle
//!
//! States a supervised venue session moves through:
//!
//! ```text
//! Idle → Connecting → Subscribed → Streaming
//!            │            │            │
//!            └────────────┴────────────┴──► Failed → Backoff → Connecting …
//! ```
//!
//! There is no terminal state. `Idle` is re-entered only on shutdown.

use std::fmt;

/// Lifecycle state of one supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not started, or stopped by shutdown.
    #[default]
    Idle,
    /// Opening the transport.
    Connecting,
    /// Transport open, subscribe requests sent.
    Subscribed,
    /// First valid frame received.
    Streaming,
    /// Session ended with an error.
    Failed,
    /// Sleeping before the next connect.
    Backoff,
}

impl ConnectionState {
    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Backoff, Self::Connecting)
                | (Self::Connecting, Self::Subscribed | Self::Failed)
                | (Self::Subscribed, Self::Streaming | Self::Failed)
                | (Self::Streaming, Self::Failed)
                | (Self::Failed, Self::Backoff)
                | (_, Self::Idle)
        )
    }

    /// Lowercase name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Failed => "failed",
            Self::Backoff => "backoff",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::ConnectionState::{self, *};

    #[test_case(Idle, Connecting ; "first start")]
    #[test_case(Connecting, Subscribed ; "handshake")]
    #[test_case(Connecting, Failed ; "connect refused")]
    #[test_case(Subscribed, Streaming ; "first frame")]
    #[test_case(Subscribed, Failed ; "subscribe send failed")]
    #[test_case(Streaming, Failed ; "read error")]
    #[test_case(Failed, Backoff ; "always back off")]
    #[test_case(Backoff, Connecting ; "retry")]
    #[test_case(Streaming, Idle ; "shutdown")]
    fn legal(from: ConnectionState, to: ConnectionState) {
        assert!(from.can_transition_to(to));
    }

    #[test_case(Idle, Streaming ; "skip handshake")]
    #[test_case(Failed, Connecting ; "skip backoff")]
    #[test_case(Backoff, Streaming ; "stream while sleeping")]
    #[test_case(Streaming, Subscribed ; "go backwards")]
    #[test_case(Connecting, Streaming ; "stream before subscribe")]
    fn illegal(from: ConnectionState, to: ConnectionState) {
        assert!(!from.can_transition_to(to));
    }
}
