//! Bounded command queue
//!
//! Multi-producer, single-consumer FIFO with a depth ceiling. Producers never
//! block: a full queue rejects the command on the spot.

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::PendingCommand;
use crate::protocol::CommandError;

/// FIFO of commands waiting for the transport worker
pub struct CommandQueue {
    tx: Sender<PendingCommand>,
    rx: Receiver<PendingCommand>,
    closed: AtomicBool,
    /// Dropped on close, which wakes a consumer blocked in `pop`
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    ceiling: usize,
}

impl CommandQueue {
    /// Queue accepting at most `ceiling` waiting commands
    pub fn new(ceiling: usize) -> Self {
        let (tx, rx) = bounded(ceiling);
        let (close_tx, close_rx) = bounded(0);
        Self {
            tx,
            rx,
            closed: AtomicBool::new(false),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            ceiling,
        }
    }

    /// Commands currently waiting
    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue a command and wake the worker.
    ///
    /// On rejection the command is handed back untouched together with the reason.
    pub fn push(&self, command: PendingCommand) -> Result<(), (PendingCommand, CommandError)> {
        if self.is_closed() {
            return Err((command, CommandError::SessionClosed));
        }
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                return Err((
                    command,
                    CommandError::QueueFull {
                        depth: self.rx.len(),
                        ceiling: self.ceiling,
                    },
                ));
            }
            Err(TrySendError::Disconnected(command)) => {
                return Err((command, CommandError::SessionClosed));
            }
        }
        // Lost a race with close: nobody will pop it any more
        if self.is_closed() {
            for command in self.rx.try_iter() {
                command.resolve(Err(CommandError::SessionClosed));
            }
        }
        Ok(())
    }

    /// Take the oldest command without waiting
    pub fn try_pop(&self) -> Option<PendingCommand> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next command.
    ///
    /// Spins for up to `spin` first, then blocks until a command arrives or
    /// the queue is closed. Returns `None` once the queue is closed.
    pub fn pop(&self, spin: Duration) -> Option<PendingCommand> {
        let spin_until = Instant::now() + spin;
        loop {
            if self.is_closed() {
                return None;
            }
            match self.rx.try_recv() {
                Ok(command) => return Some(command),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            if Instant::now() >= spin_until {
                break;
            }
            std::hint::spin_loop();
        }

        select! {
            recv(self.rx) -> command => match command {
                Ok(command) if self.is_closed() => {
                    command.resolve(Err(CommandError::SessionClosed));
                    None
                }
                command => command.ok(),
            },
            recv(self.close_rx) -> _ => None,
        }
    }

    /// Stop accepting commands and wake the worker. Returns whatever was still
    /// waiting so the caller can resolve it.
    pub fn close(&self) -> Vec<PendingCommand> {
        self.closed.store(true, Ordering::Release);
        self.close_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.rx.try_iter().collect()
    }
}
