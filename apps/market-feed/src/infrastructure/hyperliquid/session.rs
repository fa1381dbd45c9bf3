//! Hyperliquid WebSocket Session
//!
//! One physical connection serving one stream tag. The session connects,
//! subscribes every channel kind of its [`ChannelSpec`] on the same socket,
//! then pushes decoded quotes and trades into the symbol's queues until the
//! transport fails or it is cancelled. It never retries; the reconnect
//! controller does.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec, VenueMessage};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::{PingRequest, SubscribeRequest, WsTrade};
use crate::application::ports::{Session, SessionError, SessionFactory, SessionObserver};
use crate::domain::backpressure::{PushOutcome, QueuePair};
use crate::domain::connection::ConnectionState;
use crate::domain::streaming::{EventKind, Quote, Trade};
use crate::domain::subscription::{ChannelKind, ChannelSpec, StreamTag};
use crate::infrastructure::metrics;

/// Mainnet WebSocket endpoint.
pub const MAINNET_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";

/// Testnet WebSocket endpoint.
pub const TESTNET_WS_URL: &str = "wss://api.hyperliquid-testnet.xyz/ws";

/// Venue channel name used in stream tags.
pub const VENUE: &str = "hyperliquid";

/// Hyperliquid network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// Production.
    #[default]
    Mainnet,
    /// Test network.
    Testnet,
}

impl Network {
    /// WebSocket endpoint of this network.
    #[must_use]
    pub const fn ws_url(self) -> &'static str {
        match self {
            Self::Mainnet => MAINNET_WS_URL,
            Self::Testnet => TESTNET_WS_URL,
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            other => Err(format!("unknown network '{other}' (expected mainnet or testnet)")),
        }
    }
}

/// Connection settings shared by every Hyperliquid session.
#[derive(Debug, Clone)]
pub struct HyperliquidConfig {
    /// WebSocket URL.
    pub url: String,
    /// Limit on opening the transport.
    pub connect_timeout: Duration,
    /// Keep-alive settings.
    pub heartbeat: HeartbeatConfig,
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self::for_network(Network::Mainnet)
    }
}

impl HyperliquidConfig {
    /// Defaults for `network`.
    #[must_use]
    pub fn for_network(network: Network) -> Self {
        Self {
            url: network.ws_url().to_string(),
            connect_timeout: Duration::from_secs(10),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates [`HyperliquidSession`]s.
#[derive(Debug, Clone, Default)]
pub struct HyperliquidSessionFactory {
    config: HyperliquidConfig,
}

impl HyperliquidSessionFactory {
    /// Create a factory for `config`.
    #[must_use]
    pub const fn new(config: HyperliquidConfig) -> Self {
        Self { config }
    }

    /// Connection settings.
    #[must_use]
    pub const fn config(&self) -> &HyperliquidConfig {
        &self.config
    }
}

impl SessionFactory for HyperliquidSessionFactory {
    fn create(
        &self,
        tag: &StreamTag,
        spec: &ChannelSpec,
        queues: Arc<QueuePair>,
    ) -> Arc<dyn Session> {
        Arc::new(HyperliquidSession::new(
            self.config.clone(),
            tag.clone(),
            spec.clone(),
            queues,
        ))
    }
}

// =============================================================================
// Session
// =============================================================================

/// One Hyperliquid WebSocket connection for one stream tag.
pub struct HyperliquidSession {
    config: HyperliquidConfig,
    tag: StreamTag,
    spec: ChannelSpec,
    queues: Arc<QueuePair>,
    codec: JsonCodec,
}

impl HyperliquidSession {
    /// Create a session; nothing connects until [`Session::run`].
    #[must_use]
    pub const fn new(
        config: HyperliquidConfig,
        tag: StreamTag,
        spec: ChannelSpec,
        queues: Arc<QueuePair>,
    ) -> Self {
        Self {
            config,
            tag,
            spec,
            queues,
            codec: JsonCodec::new(),
        }
    }

    /// Decode one text frame and push any resulting events.
    ///
    /// Frames for other coins, control frames and unknown channels are
    /// accepted and produce nothing.
    ///
    /// # Errors
    ///
    /// Returns the codec error of a malformed frame. Nothing from that frame
    /// is pushed.
    pub fn handle_text(&self, text: &str) -> Result<(), CodecError> {
        match self.codec.decode(text)? {
            VenueMessage::Book(book) => {
                if book.coin != self.spec.coin() || !self.spec.includes(ChannelKind::L2Book) {
                    return Ok(());
                }
                metrics::record_frame_received(ChannelKind::L2Book);

                let now = chrono::Utc::now().timestamp_millis();
                if let Some(quote) = book.top_of_book(now)? {
                    self.push_quote(quote);
                } else {
                    tracing::trace!(tag = %self.tag, "One-sided book, no quote");
                }
            }
            VenueMessage::Trades(trades) => {
                if !self.spec.includes(ChannelKind::Trades) {
                    return Ok(());
                }
                let trades = trades
                    .iter()
                    .filter(|trade| trade.coin == self.spec.coin())
                    .map(WsTrade::to_trade)
                    .collect::<Result<Vec<_>, _>>()?;
                if trades.is_empty() {
                    return Ok(());
                }

                metrics::record_frame_received(ChannelKind::Trades);
                for trade in trades {
                    self.push_trade(trade);
                }
            }
            VenueMessage::SubscriptionResponse => {
                tracing::debug!(tag = %self.tag, "Subscription confirmed");
            }
            VenueMessage::Pong => {
                tracing::trace!(tag = %self.tag, "Pong");
            }
            VenueMessage::Error(msg) => {
                tracing::warn!(tag = %self.tag, msg = %msg, "Venue error");
            }
            VenueMessage::Unknown(channel) => {
                tracing::trace!(tag = %self.tag, channel = %channel, "Ignoring unhandled channel");
            }
        }

        Ok(())
    }

    fn push_quote(&self, quote: Quote) {
        if self.queues.quotes().push(quote) == PushOutcome::EvictedOldest {
            metrics::record_queue_eviction(EventKind::Quote);
        }
    }

    fn push_trade(&self, trade: Trade) {
        if self.queues.trades().push(trade) == PushOutcome::EvictedOldest {
            metrics::record_queue_eviction(EventKind::Trade);
        }
    }

    /// Report the handshake as `Subscribed`, then request every channel.
    async fn subscribe<W>(
        &self,
        write: &mut W,
        observer: &dyn SessionObserver,
    ) -> Result<(), SessionError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        observer.on_state(ConnectionState::Subscribed);
        self.send_subscriptions(write).await
    }

    async fn send_subscriptions<W>(&self, write: &mut W) -> Result<(), SessionError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        for kind in self.spec.channels() {
            let request = SubscribeRequest::new(*kind, self.spec.coin());
            let json = self
                .codec
                .encode(&request)
                .map_err(|e| SessionError::SubscribeFailed(e.to_string()))?;

            tracing::debug!(tag = %self.tag, channel = %kind, "Sending subscribe request");
            write
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| SessionError::SubscribeFailed(e.to_string()))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Session for HyperliquidSession {
    async fn run(
        &self,
        observer: &dyn SessionObserver,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        tracing::info!(tag = %self.tag, url = %self.config.url, "Connecting to Hyperliquid stream");

        let timeout = self.config.connect_timeout;
        let connect = tokio_tungstenite::connect_async(self.config.url.as_str());
        let ws_stream = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(timeout, connect) => match result {
                Err(_) => return Err(SessionError::ConnectTimeout(timeout)),
                Ok(Err(e)) => return Err(SessionError::ConnectionFailed(e.to_string())),
                Ok(Ok((ws_stream, _response))) => ws_stream,
            },
        };

        let (mut write, mut read) = ws_stream.split();

        self.subscribe(&mut write, observer).await?;

        let ping = self
            .codec
            .encode(&PingRequest::default())
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        // Set up heartbeat
        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        let mut streaming = false;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                heartbeat_event = heartbeat_rx.recv() => {
                    match heartbeat_event {
                        Some(HeartbeatEvent::SendPing) => {
                            heartbeat_state.mark_ping_sent();
                            write
                                .send(Message::Text(ping.clone().into()))
                                .await
                                .map_err(|e| SessionError::Transport(e.to_string()))?;
                        }
                        Some(HeartbeatEvent::Timeout) => {
                            return Err(SessionError::HeartbeatTimeout);
                        }
                        None => {
                            tracing::debug!(tag = %self.tag, "Heartbeat channel closed");
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat_state.record_activity();

                            match self.handle_text(&text) {
                                Ok(()) if !streaming => {
                                    streaming = true;
                                    observer.on_state(ConnectionState::Streaming);
                                    tracing::info!(tag = %self.tag, "Streaming");
                                }
                                Ok(()) => {}
                                Err(e) => {
                                    metrics::record_frame_malformed();
                                    tracing::debug!(tag = %self.tag, error = %e, "Dropping malformed frame");
                                }
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat_state.record_activity();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat_state.record_activity();
                            write
                                .send(Message::Pong(data))
                                .await
                                .map_err(|e| SessionError::Transport(e.to_string()))?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!(tag = %self.tag, "Server sent close frame");
                            return Err(SessionError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Ignore other message types
                        }
                        Some(Err(e)) => {
                            return Err(SessionError::Transport(e.to_string()));
                        }
                        None => {
                            tracing::info!(tag = %self.tag, "WebSocket stream ended");
                            return Err(SessionError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }
}
