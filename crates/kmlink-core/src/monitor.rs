//! Press-timeout monitor
//!
//! A background scan that notices keys and buttons held longer than a
//! threshold. A stuck press usually means a release got lost on the host side,
//! so the handler may ask for the input to be released.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dispatch::{CommandFuture, CommandSender};
use crate::input::InputId;
use crate::press_state::PressState;

/// A press that outlived the threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressTimeout {
    /// The stale input
    pub input: InputId,
    /// When its press was confirmed
    pub pressed_at: DateTime<Utc>,
    /// How long it has been held at scan time
    pub held_for: Duration,
    /// Set to `true` to have the monitor release the input
    pub release: bool,
}

/// Handler invoked for every stale press found by a scan
pub type TimeoutHandler = Box<dyn FnMut(&mut PressTimeout) + Send>;

/// Scans press state for stale presses
pub struct PressTimeoutMonitor {
    press_state: Arc<PressState>,
    commands: CommandSender,
    threshold: Duration,
    handler: Mutex<TimeoutHandler>,
    /// Releases queued by earlier scans and not yet resolved
    releasing: Mutex<HashMap<InputId, CommandFuture>>,
}

impl PressTimeoutMonitor {
    /// Monitor reporting presses held longer than `threshold` to `handler`
    pub fn new(
        press_state: Arc<PressState>,
        commands: CommandSender,
        threshold: Duration,
        handler: TimeoutHandler,
    ) -> Self {
        Self {
            press_state,
            commands,
            threshold,
            handler: Mutex::new(handler),
            releasing: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a release of `input` is still queued or in flight.
    ///
    /// Forgets releases that have resolved; a failed one lets the press be
    /// reported again.
    fn release_outstanding(
        releasing: &mut HashMap<InputId, CommandFuture>,
        input: InputId,
    ) -> bool {
        let Some(future) = releasing.get_mut(&input) else {
            return false;
        };
        match future.try_result() {
            None => true,
            Some(Ok(())) => {
                releasing.remove(&input);
                false
            }
            Some(Err(e)) => {
                debug!(?input, "release of stale press failed: {}", e);
                releasing.remove(&input);
                false
            }
        }
    }

    /// Check every pressed input against the threshold as of `now`.
    ///
    /// Releases requested by the handler are queued without waiting for their
    /// outcome. An input whose release is still outstanding is skipped.
    /// Returns the number of stale presses reported.
    pub fn scan(&self, now: DateTime<Utc>) -> usize {
        let mut releasing = self.releasing.lock().unwrap_or_else(PoisonError::into_inner);
        let pressed = self.press_state.pressed();
        releasing.retain(|input, _| pressed.iter().any(|(id, _)| id == input));

        let mut reported = 0;
        for (input, pressed_at) in pressed {
            let held_for = (now - pressed_at).to_std().unwrap_or_default();
            if held_for <= self.threshold || Self::release_outstanding(&mut releasing, input) {
                continue;
            }

            let mut timeout = PressTimeout {
                input,
                pressed_at,
                held_for,
                release: false,
            };
            {
                let mut handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
                (*handler)(&mut timeout);
            }
            reported += 1;

            if timeout.release {
                let frame = input.release_frame();
                let on_success = self.press_state.on_confirmed(&frame);
                match self.commands.submit(frame, on_success) {
                    Ok(future) => {
                        debug!(?input, "queued release for stale press");
                        releasing.insert(input, future);
                    }
                    Err(e) => warn!(?input, "could not queue release for stale press: {}", e),
                }
            }
        }
        reported
    }

    /// Run [`scan`](Self::scan) every `period` on a background thread
    pub fn start(self, period: Duration) -> io::Result<MonitorHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("kmlink-monitor".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        self.scan(Utc::now());
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        info!(period_ms = period.as_millis() as u64, "press-timeout monitor started");
        Ok(MonitorHandle {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

/// Running monitor; stops on drop
pub struct MonitorHandle {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop scanning and join the thread. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("press-timeout monitor stopped");
        }
    }

    /// Whether the scan thread is alive
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
