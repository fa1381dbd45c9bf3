//! Stream Registry
//!
//! Starts at most one supervised session per stream tag and owns the
//! per-symbol queue pairs those sessions feed. Check-then-start happens in a
//! single critical section, so concurrent callers for the same tag see
//! exactly one session start.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::SessionFactory;
use crate::domain::backpressure::{DEFAULT_QUEUE_CAPACITY, QueuePair};
use crate::domain::connection::ConnectionState;
use crate::domain::subscription::{
    ChannelSpec, ConfigurationError, StreamTag, Symbol, to_venue_coin,
};
use crate::infrastructure::metrics;
use crate::infrastructure::reconnect::{ConnectionMonitor, ReconnectConfig, ReconnectController};

/// Registry settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of each quote and trade queue.
    pub queue_capacity: usize,
    /// Backoff applied by every stream supervisor.
    pub reconnect: ReconnectConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reconnect: ReconnectConfig::default(),
        }
    }
}

struct StreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    monitor: Arc<ConnectionMonitor>,
}

impl StreamHandle {
    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

#[derive(Default)]
struct RegistryState {
    streams: HashMap<StreamTag, StreamHandle>,
    queues: HashMap<Symbol, Arc<QueuePair>>,
}

/// Deduplicates stream startup and owns the queue pairs.
pub struct StreamRegistry {
    factory: Arc<dyn SessionFactory>,
    runtime: Handle,
    cancel: CancellationToken,
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

impl StreamRegistry {
    /// Create a registry spawning sessions on `runtime`.
    ///
    /// Every stream gets a child of `cancel`.
    #[must_use]
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        runtime: Handle,
        config: RegistryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            runtime,
            cancel,
            config,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Make sure a supervised session serves `symbol` on `spec`.
    ///
    /// Creates the symbol's queue pair if absent and returns it. A no-op for
    /// a tag whose session is already running; a finished session is
    /// started again.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] before anything starts if the symbol
    /// cannot be resolved.
    pub fn ensure_stream(
        &self,
        symbol: &str,
        spec: &ChannelSpec,
    ) -> Result<Arc<QueuePair>, ConfigurationError> {
        to_venue_coin(symbol)?;
        let tag = StreamTag::new(symbol, spec);

        let mut state = self.state.lock();
        let queues = Arc::clone(
            state
                .queues
                .entry(symbol.to_string())
                .or_insert_with(|| Arc::new(QueuePair::new(self.config.queue_capacity))),
        );

        if state.streams.get(&tag).is_some_and(StreamHandle::is_alive) {
            return Ok(queues);
        }

        if self.cancel.is_cancelled() {
            tracing::warn!(tag = %tag, "Registry shut down, not starting stream");
            return Ok(queues);
        }

        if state.streams.remove(&tag).is_some() {
            tracing::warn!(tag = %tag, "Stream supervisor exited, restarting");
        }

        let handle = self.start(&tag, spec, Arc::clone(&queues));
        state.streams.insert(tag, handle);

        Ok(queues)
    }

    fn start(&self, tag: &StreamTag, spec: &ChannelSpec, queues: Arc<QueuePair>) -> StreamHandle {
        let session = self.factory.create(tag, spec, queues);
        let cancel = self.cancel.child_token();
        let controller = ReconnectController::new(
            tag.clone(),
            session,
            self.config.reconnect.clone(),
            cancel.clone(),
        );
        let monitor = controller.monitor();
        let task = self.runtime.spawn(controller.run());

        metrics::record_session_started();
        tracing::info!(tag = %tag, "Stream started");

        StreamHandle {
            cancel,
            task,
            monitor,
        }
    }

    /// Tags with a live supervisor, sorted.
    #[must_use]
    pub fn active_streams(&self) -> Vec<StreamTag> {
        let state = self.state.lock();
        let mut tags: Vec<StreamTag> = state
            .streams
            .iter()
            .filter(|(_, handle)| handle.is_alive())
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }

    /// Whether `tag` has a live supervisor.
    #[must_use]
    pub fn is_running(&self, tag: &StreamTag) -> bool {
        self.state
            .lock()
            .streams
            .get(tag)
            .is_some_and(StreamHandle::is_alive)
    }

    /// Connection state of `tag`, if it was ever started.
    #[must_use]
    pub fn connection_state(&self, tag: &StreamTag) -> Option<ConnectionState> {
        self.state
            .lock()
            .streams
            .get(tag)
            .map(|handle| handle.monitor.state())
    }

    /// Queue pair of `symbol`, if created.
    #[must_use]
    pub fn queues(&self, symbol: &str) -> Option<Arc<QueuePair>> {
        self.state.lock().queues.get(symbol).cloned()
    }

    /// Cancel every stream. Idempotent.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        let state = self.state.lock();
        for handle in state.streams.values() {
            handle.cancel.cancel();
        }
        tracing::info!(streams = state.streams.len(), "Stream registry shut down");
    }
}
