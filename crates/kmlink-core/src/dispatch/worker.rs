//! Transport worker thread
//!
//! Drains the command queue strictly in order, resolving each command before
//! taking the next one.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

use super::{lock_transport, CommandQueue};
use crate::protocol::Transport;

/// Signals the owner when the worker loop ends, including by panic
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Handle to the running worker
pub(crate) struct Worker {
    handle: JoinHandle<()>,
    // Mutex only to make the handle Sync
    exited: Mutex<Receiver<()>>,
}

impl Worker {
    pub(crate) fn spawn(
        queue: Arc<CommandQueue>,
        transport: Arc<Mutex<Transport>>,
        idle_spin: Duration,
    ) -> io::Result<Self> {
        let (exit_tx, exited) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("kmlink-transport".into())
            .spawn(move || {
                let _exit = ExitSignal(exit_tx);
                run(&queue, &transport, idle_spin);
            })?;
        Ok(Self {
            handle,
            exited: Mutex::new(exited),
        })
    }

    /// Wait up to `timeout` for the loop to end, then join the thread.
    ///
    /// Hands the worker back if it is still running.
    pub(crate) fn join(self, timeout: Duration) -> Result<(), Self> {
        let outcome = self
            .exited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv_timeout(timeout);
        match outcome {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = self.handle.join();
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }
}

fn run(queue: &CommandQueue, transport: &Mutex<Transport>, idle_spin: Duration) {
    debug!("transport worker started");
    while let Some(command) = queue.pop(idle_spin) {
        trace!(frame = %command.frame, "dequeued");
        // The lock is released before any completion code runs
        let outcome = lock_transport(transport).send(&command.frame);
        command.complete(outcome);
    }
    debug!("transport worker stopped");
}
