//! Async Bridge
//!
//! The only sanctioned crossing from synchronous code into asynchronous venue
//! clients. One named worker thread owns a current-thread Tokio runtime; every
//! operation is built and polled there. A client installed with
//! [`AsyncBridge::with_client`] is built, used and dropped on that thread.
//!
//! # Usage
//!
//! ```rust,no_run
//! use market_feed::infrastructure::bridge::{AsyncBridge, BridgeConfig};
//!
//! let bridge = AsyncBridge::new(BridgeConfig::default())?;
//!
//! // Block for a result
//! let fill = bridge.await_result(|| async { Ok::<_, std::io::Error>(42) })?;
//! assert_eq!(fill, 42);
//!
//! // Fire and forget
//! bridge.schedule(|| async { Ok::<_, std::io::Error>(()) })?;
//!
//! bridge.shutdown();
//! # Ok::<(), market_feed::infrastructure::bridge::BridgeError>(())
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::application::ports::{BoxError, ExecutionPath};
use crate::infrastructure::metrics::{self, BridgeOutcome};

type Job = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()> + Send>;

thread_local! {
    static WORKER_CLIENT: RefCell<Option<Rc<dyn Any>>> = const { RefCell::new(None) };
}

fn worker_client<C: 'static>() -> Result<Rc<C>, BoxError> {
    WORKER_CLIENT
        .with(|slot| slot.borrow().clone())
        .and_then(|client| client.downcast::<C>().ok())
        .ok_or_else(|| BoxError::from("bridge client is not installed"))
}

/// Bridge errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The operation returned an error.
    #[error("bridge operation failed: {0}")]
    OperationFailed(#[source] BoxError),

    /// The operation did not finish before its deadline.
    #[error("bridge operation timed out after {0:?}")]
    TimedOut(Duration),

    /// The operation panicked. The bridge keeps serving other calls.
    #[error("bridge operation panicked: {0}")]
    Panicked(String),

    /// Blocking call made from inside an async context, including the
    /// bridge's own worker.
    #[error("blocking bridge call from inside an async context")]
    Reentrant,

    /// The bridge no longer accepts work.
    #[error("bridge is shut down")]
    ShutDown,

    /// The worker thread or runtime could not be started.
    #[error("failed to start bridge worker: {0}")]
    Startup(#[from] std::io::Error),
}

/// Bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Worker thread name.
    pub thread_name: String,
    /// How long `shutdown` waits for in-flight operations.
    pub shutdown_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            thread_name: "market-feed-bridge".to_string(),
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// Single-context gateway from synchronous callers to async operations.
pub struct AsyncBridge {
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    exited: Mutex<std::sync::mpsc::Receiver<()>>,
    stopped: Mutex<Option<bool>>,
    shutdown_timeout: Duration,
}

impl AsyncBridge {
    /// Start the worker thread and its runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Startup`] if the runtime or thread cannot be
    /// created.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<Job>();
        let (exited_tx, exited_rx) = std::sync::mpsc::channel();

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let local = LocalSet::new();
                local.block_on(&runtime, async {
                    while let Some(job) = jobs_rx.recv().await {
                        tokio::task::spawn_local(job());
                    }
                });
                // Drain operations still in flight.
                runtime.block_on(local);
                drop(WORKER_CLIENT.with(|slot| slot.borrow_mut().take()));
                let _ = exited_tx.send(());
            })?;

        tracing::info!(thread = %config.thread_name, "Async bridge started");

        Ok(Self {
            jobs: Mutex::new(Some(jobs_tx)),
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            exited: Mutex::new(exited_rx),
            stopped: Mutex::new(None),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Run `operation` on the bridge and block until it completes.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::OperationFailed`] or [`BridgeError::Panicked`]
    /// for a failed operation, [`BridgeError::Reentrant`] when called from an
    /// async context and [`BridgeError::ShutDown`] after shutdown.
    pub fn await_result<F, Fut, T, E>(&self, operation: F) -> Result<T, BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.call(operation, None)
    }

    /// Like [`await_result`](Self::await_result), failing with
    /// [`BridgeError::TimedOut`] if the operation runs longer than `timeout`.
    ///
    /// # Errors
    ///
    /// See [`await_result`](Self::await_result).
    pub fn await_result_timeout<F, Fut, T, E>(
        &self,
        operation: F,
        timeout: Duration,
    ) -> Result<T, BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.call(operation, Some(timeout))
    }

    /// Enqueue `operation` without waiting. Failures are logged.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ShutDown`] after shutdown.
    pub fn schedule<F, Fut, E>(&self, operation: F) -> Result<(), BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + 'static,
        E: Into<BoxError> + 'static,
    {
        let call_id = Uuid::new_v4();
        let span = tracing::debug_span!("bridge_call", %call_id, kind = "schedule");

        self.submit(Box::new(move || {
            async move {
                if let Err(e) = guarded(operation, None).await {
                    tracing::warn!(error = %e, "Scheduled bridge operation failed");
                }
            }
            .instrument(span)
            .boxed_local()
        }))
    }

    /// Stop accepting work and wait for in-flight operations.
    ///
    /// Idempotent. Returns `true` if the worker exited within the shutdown
    /// timeout; otherwise it is abandoned.
    pub fn shutdown(&self) -> bool {
        let mut stopped = self.stopped.lock();
        if let Some(clean) = *stopped {
            return clean;
        }

        drop(self.jobs.lock().take());
        let clean = self.join_worker();
        *stopped = Some(clean);
        clean
    }

    fn join_worker(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return true;
        };

        if thread::current().id() == self.worker_id {
            tracing::warn!("Bridge shut down from its own worker, abandoning thread");
            return false;
        }

        match self.exited.lock().recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                let _ = worker.join();
                tracing::info!("Async bridge stopped");
                true
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(self.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Bridge operations still running at shutdown, abandoning worker"
                );
                false
            }
        }
    }

    /// Whether the bridge still accepts work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.jobs.lock().is_some()
    }

    /// Build a venue client on the worker with `make`; operations receive
    /// `Rc<C>`.
    ///
    /// The client never leaves the worker thread, so `C` need not be `Send`.
    /// It is dropped there once in-flight operations drain at shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Panicked`] if `make` panics, and the errors of
    /// [`await_result`](Self::await_result) otherwise.
    pub fn with_client<C, M>(self, make: M) -> Result<ClientBridge<C>, BridgeError>
    where
        C: 'static,
        M: FnOnce() -> C + Send + 'static,
    {
        self.await_result(move || {
            let client: Rc<dyn Any> = Rc::new(make());
            WORKER_CLIENT.with(|slot| *slot.borrow_mut() = Some(client));
            std::future::ready(Ok::<_, Infallible>(()))
        })?;

        Ok(ClientBridge {
            bridge: self,
            client: PhantomData,
        })
    }

    fn call<F, Fut, T, E>(&self, operation: F, timeout: Option<Duration>) -> Result<T, BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        if thread::current().id() == self.worker_id
            || tokio::runtime::Handle::try_current().is_ok()
        {
            return Err(BridgeError::Reentrant);
        }

        let call_id = Uuid::new_v4();
        let span = tracing::debug_span!("bridge_call", %call_id, kind = "await");
        let (result_tx, result_rx) = oneshot::channel();

        self.submit(Box::new(move || {
            async move {
                let _ = result_tx.send(guarded(operation, timeout).await);
            }
            .instrument(span)
            .boxed_local()
        }))?;

        result_rx.blocking_recv().map_err(|_| BridgeError::ShutDown)?
    }

    fn submit(&self, job: Job) -> Result<(), BridgeError> {
        let jobs = self.jobs.lock();
        let sender = jobs.as_ref().ok_or(BridgeError::ShutDown)?;
        sender.send(job).map_err(|_| BridgeError::ShutDown)
    }
}

impl Drop for AsyncBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ExecutionPath for AsyncBridge {
    type Error = BridgeError;

    fn submit_and_wait<F, Fut, T, E>(&self, operation: F) -> Result<T, BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.await_result(operation)
    }

    fn submit_async<F, Fut, E>(&self, operation: F) -> Result<(), BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + 'static,
        E: Into<BoxError> + 'static,
    {
        self.schedule(operation)
    }
}

/// Runs the operation in its own local task so a panic is contained.
async fn guarded<F, Fut, T, E>(operation: F, timeout: Option<Duration>) -> Result<T, BridgeError>
where
    F: FnOnce() -> Fut + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
    T: 'static,
    E: Into<BoxError> + 'static,
{
    let task = tokio::task::spawn_local(async move {
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(BridgeError::TimedOut(limit)),
            },
            None => operation().await,
        };
        outcome.map_err(|e| BridgeError::OperationFailed(e.into()))
    });

    let result = match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(BridgeError::Panicked(panic_message(&*e.into_panic()))),
        Err(_) => Err(BridgeError::ShutDown),
    };

    metrics::record_bridge_call(match &result {
        Ok(_) => BridgeOutcome::Ok,
        Err(BridgeError::TimedOut(_)) => BridgeOutcome::TimedOut,
        Err(BridgeError::Panicked(_)) => BridgeOutcome::Panicked,
        Err(_) => BridgeOutcome::Failed,
    });

    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// =============================================================================
// Client Bridge
// =============================================================================

/// An [`AsyncBridge`] whose worker owns a venue client.
pub struct ClientBridge<C> {
    bridge: AsyncBridge,
    client: PhantomData<fn() -> C>,
}

impl<C: 'static> ClientBridge<C> {
    /// Run `operation` against the client and block for the result.
    ///
    /// # Errors
    ///
    /// See [`AsyncBridge::await_result`].
    pub fn await_result<F, Fut, T, E>(&self, operation: F) -> Result<T, BridgeError>
    where
        F: FnOnce(Rc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.bridge.await_result(move || async move {
            let client = worker_client::<C>()?;
            operation(client).await.map_err(Into::<BoxError>::into)
        })
    }

    /// Run `operation` against the client without waiting.
    ///
    /// # Errors
    ///
    /// See [`AsyncBridge::schedule`].
    pub fn schedule<F, Fut, E>(&self, operation: F) -> Result<(), BridgeError>
    where
        F: FnOnce(Rc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + 'static,
        E: Into<BoxError> + 'static,
    {
        self.bridge.schedule(move || async move {
            let client = worker_client::<C>()?;
            operation(client).await.map_err(Into::<BoxError>::into)
        })
    }

    /// Underlying bridge.
    #[must_use]
    pub const fn bridge(&self) -> &AsyncBridge {
        &self.bridge
    }

    /// Stop the bridge. See [`AsyncBridge::shutdown`].
    pub fn shutdown(&self) -> bool {
        self.bridge.shutdown()
    }
}
