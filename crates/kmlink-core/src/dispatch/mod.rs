//! Command dispatch
//!
//! Two ways to get a frame onto the wire:
//!
//! - [`Dispatcher::send`] runs the transport on the calling thread and blocks
//!   until the command is confirmed or fails.
//! - [`Dispatcher::submit`] queues the command for the worker thread and returns
//!   a [`CommandFuture`] right away.
//!
//! Both paths take the same transport lock, so two frames are never written
//! concurrently. Queued commands are delivered in submission order, and
//! successive blocking sends from one thread are delivered in call order, but
//! there is no ordering between a blocking send and queued commands.

mod queue;
mod worker;

pub use queue::CommandQueue;

use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, warn};

use crate::protocol::{
    CommandError, DeliveryError, Frame, Reporter, StatsSnapshot, Transport, TransportStats,
};
use crate::session::SessionError;
use worker::Worker;

/// Side effect run once a command is confirmed, given the time taken just
/// before the confirmed write
pub type OnSuccess = Box<dyn FnOnce(DateTime<Utc>) + Send>;

type Completion = oneshot::Sender<Result<(), CommandError>>;

pub(crate) fn lock_transport(transport: &Mutex<Transport>) -> MutexGuard<'_, Transport> {
    // Transport holds no invariant that a panicking send could break mid-way
    transport.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A queued send request
pub struct PendingCommand {
    pub(crate) frame: Frame,
    on_success: Option<OnSuccess>,
    completion: Completion,
}

impl PendingCommand {
    /// Create a command and the future its submitter awaits
    pub fn new(frame: Frame, on_success: Option<OnSuccess>) -> (Self, CommandFuture) {
        let (completion, rx) = oneshot::channel();
        (
            Self {
                frame,
                on_success,
                completion,
            },
            CommandFuture { rx },
        )
    }

    /// Frame to send
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Resolve with the transport outcome, running the success callback first
    pub(crate) fn complete(mut self, outcome: Result<DateTime<Utc>, DeliveryError>) {
        let result = match outcome {
            Ok(at) => {
                if let Some(on_success) = self.on_success.take() {
                    on_success(at);
                }
                Ok(())
            }
            Err(e) => Err(CommandError::Delivery(e)),
        };
        self.resolve(result);
    }

    /// Resolve without sending
    pub(crate) fn resolve(self, result: Result<(), CommandError>) {
        // The submitter may have dropped its future (fire-and-forget)
        let _ = self.completion.send(result);
    }
}

impl fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommand")
            .field("frame", &self.frame)
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}

/// Completion handle of a queued command.
///
/// Await it from async code, or call [`wait`](Self::wait) from a plain thread.
/// Dropping it does not cancel the command.
#[derive(Debug)]
#[must_use = "dropping the future discards the command outcome"]
pub struct CommandFuture {
    rx: oneshot::Receiver<Result<(), CommandError>>,
}

impl CommandFuture {
    /// Block the current thread until the command is resolved.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> Result<(), CommandError> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(CommandError::SessionClosed))
    }

    /// Outcome if the command has already been resolved
    pub(crate) fn try_result(&mut self) -> Option<Result<(), CommandError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(CommandError::SessionClosed)),
        }
    }
}

impl Future for CommandFuture {
    type Output = Result<(), CommandError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(CommandError::SessionClosed)))
    }
}

/// Cloneable handle for queueing commands
#[derive(Clone)]
pub struct CommandSender {
    queue: Arc<CommandQueue>,
}

impl CommandSender {
    /// Sender feeding `queue`
    pub fn new(queue: Arc<CommandQueue>) -> Self {
        Self { queue }
    }

    /// Queue a command; fails immediately when the queue is full or closed
    pub fn submit(
        &self,
        frame: Frame,
        on_success: Option<OnSuccess>,
    ) -> Result<CommandFuture, CommandError> {
        let (command, future) = PendingCommand::new(frame, on_success);
        match self.queue.push(command) {
            Ok(()) => Ok(future),
            Err((command, e)) => {
                if e.is_backpressure() {
                    warn!(frame = %command.frame, "{}", e);
                }
                Err(e)
            }
        }
    }
}

/// Owns the transport worker and the queue feeding it
pub struct Dispatcher {
    queue: Arc<CommandQueue>,
    transport: Arc<Mutex<Transport>>,
    stats: Arc<TransportStats>,
    worker: Option<Worker>,
}

impl Dispatcher {
    /// Start the worker thread for `transport`
    pub fn spawn(transport: Transport, ceiling: usize, idle_spin: Duration) -> io::Result<Self> {
        let stats = transport.stats();
        let queue = Arc::new(CommandQueue::new(ceiling));
        let transport = Arc::new(Mutex::new(transport));
        let worker = Worker::spawn(Arc::clone(&queue), Arc::clone(&transport), idle_spin)?;
        Ok(Self {
            queue,
            transport,
            stats,
            worker: Some(worker),
        })
    }

    /// Send on the calling thread, blocking until confirmed or failed
    pub fn send(&self, frame: Frame, on_success: Option<OnSuccess>) -> Result<(), CommandError> {
        if self.queue.is_closed() {
            return Err(CommandError::SessionClosed);
        }
        let outcome = lock_transport(&self.transport).send(&frame);
        let at = outcome?;
        if let Some(on_success) = on_success {
            on_success(at);
        }
        Ok(())
    }

    /// Queue for the worker thread
    pub fn submit(
        &self,
        frame: Frame,
        on_success: Option<OnSuccess>,
    ) -> Result<CommandFuture, CommandError> {
        self.sender().submit(frame, on_success)
    }

    /// Handle for queueing from other components
    pub fn sender(&self) -> CommandSender {
        CommandSender::new(Arc::clone(&self.queue))
    }

    /// Install or remove the report forwarder
    pub fn set_reporter(&self, reporter: Option<Reporter>) {
        lock_transport(&self.transport).set_reporter(reporter);
    }

    /// Transport counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Commands waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Whether shutdown has begun
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    fn resolve_leftovers(&self) {
        for command in self.queue.close() {
            command.resolve(Err(CommandError::SessionClosed));
        }
    }

    /// Stop the worker and wait up to `timeout` for it to exit.
    ///
    /// Commands still queued are resolved with [`CommandError::SessionClosed`].
    /// Calling this again after success is a no-op.
    pub fn shutdown(&mut self, timeout: Duration) -> Result<(), SessionError> {
        self.resolve_leftovers();

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join(timeout) {
            Ok(()) => {
                self.resolve_leftovers();
                Ok(())
            }
            Err(worker) => {
                error!(
                    timeout_ms = timeout.as_millis() as u64,
                    "transport worker did not stop, channel is wedged"
                );
                self.worker = Some(worker);
                Err(SessionError::WorkerStuck { timeout })
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.shutdown(Duration::from_millis(500));
        }
    }
}
