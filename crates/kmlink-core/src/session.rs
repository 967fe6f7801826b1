//! Device session
//!
//! [`Session`] is the public face of the crate. It owns the transport worker,
//! tracks which keys and buttons the device currently holds, remembers the
//! absolute pointer resolution, and optionally runs the press-timeout monitor.
//!
//! Every operation comes in two forms: a blocking one that returns once the
//! device echoed the frame (or the attempts ran out), and an `_async` one that
//! queues the frame and returns a [`CommandFuture`].

use chrono::{DateTime, Utc};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, Resolution, SessionConfig};
use crate::dispatch::{CommandFuture, Dispatcher, OnSuccess};
use crate::input::{InputId, KeyCode, MouseButton};
use crate::monitor::{MonitorHandle, PressTimeout, PressTimeoutMonitor, TimeoutHandler};
use crate::press_state::PressState;
use crate::protocol::{
    open_port, ByteChannel, CommandError, Frame, FrameError, FrameKind, Payload, ReportHook,
    Reporter, SerialChannel, StatsSnapshot, Transport,
};

/// Session-level errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Opening the port failed
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// Spawning a session thread failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The config did not validate
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A command issued while opening failed
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// The worker is still blocked on the channel
    #[error("Transport worker did not stop within {timeout:?}")]
    WorkerStuck {
        /// How long shutdown waited
        timeout: Duration,
    },

    /// The monitor needs a handler first
    #[error("No press-timeout handler registered")]
    NoTimeoutHandler,

    /// Enabled twice
    #[error("Press-timeout monitor already running")]
    MonitorAlreadyRunning,
}

fn pack(res: Resolution) -> u32 {
    (u32::from(res.width) << 16) | u32::from(res.height)
}

fn unpack(raw: u32) -> Resolution {
    Resolution {
        width: (raw >> 16) as u16,
        height: raw as u16,
    }
}

#[derive(Default)]
struct MonitorSlot {
    handler: Option<Arc<Mutex<TimeoutHandler>>>,
    running: Option<MonitorHandle>,
}

/// An open connection to the HID bridge
pub struct Session {
    dispatcher: Dispatcher,
    press_state: Arc<PressState>,
    resolution: Arc<AtomicU32>,
    monitor: Mutex<MonitorSlot>,
    config: SessionConfig,
    closed: bool,
}

impl Session {
    /// Open the serial port named in `config` and start the session
    pub fn open(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let port = open_port(&config.port_name, Some(config.baud_rate))?;
        let channel = SerialChannel::new(port);
        info!(
            port = %channel.name().unwrap_or_else(|| config.port_name.clone()),
            baud = config.baud_rate,
            "serial port opened"
        );
        Self::with_channel(Box::new(channel), config)
    }

    /// Start a session over an already open channel
    pub fn with_channel(
        channel: Box<dyn ByteChannel>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let transport = Transport::new(channel, config.transport_settings());
        let dispatcher = Dispatcher::spawn(transport, config.queue_ceiling, config.idle_spin())?;

        let session = Self {
            dispatcher,
            press_state: Arc::new(PressState::new()),
            resolution: Arc::new(AtomicU32::new(pack(Resolution::default()))),
            monitor: Mutex::new(MonitorSlot::default()),
            config,
            closed: false,
        };

        if let Some(res) = session.config.resolution {
            session.set_resolution(res.width, res.height)?;
        }
        Ok(session)
    }

    /// Settings the session was opened with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Side effects of a confirmed frame
    fn on_success(&self, frame: &Frame) -> Option<OnSuccess> {
        if let (FrameKind::MouseResolution, Payload::Coordinates(width, height)) =
            (frame.kind(), frame.payload())
        {
            let resolution = Arc::clone(&self.resolution);
            return Some(Box::new(move |_: DateTime<Utc>| {
                resolution.store(pack(Resolution { width, height }), Ordering::Release);
            }));
        }
        self.press_state.on_confirmed(frame)
    }

    /// Send a frame and block until the device confirms it
    pub fn send(&self, frame: Frame) -> Result<(), CommandError> {
        let on_success = self.on_success(&frame);
        self.dispatcher.send(frame, on_success)
    }

    /// Queue a frame for the transport worker
    pub fn submit(&self, frame: Frame) -> Result<CommandFuture, CommandError> {
        let on_success = self.on_success(&frame);
        self.dispatcher.submit(frame, on_success)
    }

    /// Press a key
    pub fn key_press(&self, key: KeyCode) -> Result<(), CommandError> {
        self.send(Frame::key_press(key.usage()))
    }

    /// Queue a key press
    pub fn key_press_async(&self, key: KeyCode) -> Result<CommandFuture, CommandError> {
        self.submit(Frame::key_press(key.usage()))
    }

    /// Release a key
    pub fn key_release(&self, key: KeyCode) -> Result<(), CommandError> {
        self.send(Frame::key_release(key.usage()))
    }

    /// Queue a key release
    pub fn key_release_async(&self, key: KeyCode) -> Result<CommandFuture, CommandError> {
        self.submit(Frame::key_release(key.usage()))
    }

    /// Release every key
    pub fn release_all_keys(&self) -> Result<(), CommandError> {
        self.send(Frame::release_all_keys())
    }

    /// Queue a release of every key
    pub fn release_all_keys_async(&self) -> Result<CommandFuture, CommandError> {
        self.submit(Frame::release_all_keys())
    }

    /// Press a mouse button
    pub fn mouse_press(&self, button: MouseButton) -> Result<(), CommandError> {
        self.send(Frame::mouse_press(button.mask()))
    }

    /// Queue a mouse button press
    pub fn mouse_press_async(&self, button: MouseButton) -> Result<CommandFuture, CommandError> {
        self.submit(Frame::mouse_press(button.mask()))
    }

    /// Release a mouse button
    pub fn mouse_release(&self, button: MouseButton) -> Result<(), CommandError> {
        self.send(Frame::mouse_release(button.mask()))
    }

    /// Queue a mouse button release
    pub fn mouse_release_async(&self, button: MouseButton) -> Result<CommandFuture, CommandError> {
        self.submit(Frame::mouse_release(button.mask()))
    }

    /// Release every mouse button
    pub fn release_all_buttons(&self) -> Result<(), CommandError> {
        self.send(Frame::release_all_buttons())
    }

    /// Queue a release of every mouse button
    pub fn release_all_buttons_async(&self) -> Result<CommandFuture, CommandError> {
        self.submit(Frame::release_all_buttons())
    }

    /// Build an absolute move, checking it against the current resolution.
    ///
    /// Coordinates are 1-based: `(1, 1)` is the top-left pixel and
    /// `(width, height)` the bottom-right one.
    fn absolute_move(&self, x: u16, y: u16) -> Result<Frame, FrameError> {
        let Resolution { width, height } = self.resolution();
        if !(1..=width).contains(&x) || !(1..=height).contains(&y) {
            return Err(FrameError::CoordinateOutOfRange {
                x,
                y,
                width,
                height,
            });
        }
        Ok(Frame::mouse_move(x, y))
    }

    /// Move the pointer to an absolute position
    pub fn mouse_move(&self, x: u16, y: u16) -> Result<(), CommandError> {
        self.send(self.absolute_move(x, y)?)
    }

    /// Queue an absolute move, checked like [`mouse_move`](Self::mouse_move)
    pub fn mouse_move_async(&self, x: u16, y: u16) -> Result<CommandFuture, CommandError> {
        self.submit(self.absolute_move(x, y)?)
    }

    /// Move the pointer by an offset
    pub fn mouse_move_relative(&self, dx: i16, dy: i16) -> Result<(), CommandError> {
        self.send(Frame::mouse_move_relative(dx, dy))
    }

    /// Queue a relative move
    pub fn mouse_move_relative_async(
        &self,
        dx: i16,
        dy: i16,
    ) -> Result<CommandFuture, CommandError> {
        self.submit(Frame::mouse_move_relative(dx, dy))
    }

    /// Scroll the wheel; positive is up
    pub fn mouse_scroll(&self, delta: i8) -> Result<(), CommandError> {
        self.send(Frame::mouse_scroll(delta))
    }

    /// Queue a scroll
    pub fn mouse_scroll_async(&self, delta: i8) -> Result<CommandFuture, CommandError> {
        self.submit(Frame::mouse_scroll(delta))
    }

    /// Tell the device the absolute coordinate space.
    ///
    /// The tracked resolution changes only once the device confirms.
    pub fn set_resolution(&self, width: u16, height: u16) -> Result<(), CommandError> {
        self.send(Self::resolution_frame(width, height)?)
    }

    /// Queue a resolution change
    pub fn set_resolution_async(
        &self,
        width: u16,
        height: u16,
    ) -> Result<CommandFuture, CommandError> {
        self.submit(Self::resolution_frame(width, height)?)
    }

    fn resolution_frame(width: u16, height: u16) -> Result<Frame, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::CoordinateOutOfRange {
                x: width,
                y: height,
                width: u16::MAX,
                height: u16::MAX,
            });
        }
        Ok(Frame::mouse_resolution(width, height))
    }

    /// Last resolution confirmed by the device
    pub fn resolution(&self) -> Resolution {
        unpack(self.resolution.load(Ordering::Acquire))
    }

    /// Whether the device holds `key`
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.press_state.is_pressed(InputId::Key(key))
    }

    /// Whether the device holds `button`
    pub fn is_button_pressed(&self, button: MouseButton) -> bool {
        self.press_state.is_pressed(InputId::Button(button))
    }

    /// When the press of `input` was confirmed, if it is still held
    pub fn pressed_since(&self, input: impl Into<InputId>) -> Option<DateTime<Utc>> {
        self.press_state.pressed_since(input.into())
    }

    /// Shared press table
    pub fn press_state(&self) -> &Arc<PressState> {
        &self.press_state
    }

    /// Transport counters
    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.stats()
    }

    /// Commands waiting for the worker
    pub fn queue_depth(&self) -> usize {
        self.dispatcher.queue_depth()
    }

    /// Report every finished send to `hook`, or stop reporting with `None`
    pub fn set_report_hook(&self, hook: Option<ReportHook>) -> Result<(), SessionError> {
        let reporter = hook.map(Reporter::spawn).transpose()?;
        self.dispatcher.set_reporter(reporter);
        Ok(())
    }

    fn monitor_slot(&self) -> std::sync::MutexGuard<'_, MonitorSlot> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the callback the press-timeout monitor invokes for stale presses.
    ///
    /// Takes effect the next time the monitor is enabled.
    pub fn set_press_timeout_handler<F>(&self, handler: F)
    where
        F: FnMut(&mut PressTimeout) + Send + 'static,
    {
        let handler: TimeoutHandler = Box::new(handler);
        self.monitor_slot().handler = Some(Arc::new(Mutex::new(handler)));
    }

    /// Start scanning for stale presses with the configured period and threshold
    pub fn enable_press_monitor(&self) -> Result<(), SessionError> {
        let mut slot = self.monitor_slot();
        if slot.running.is_some() {
            return Err(SessionError::MonitorAlreadyRunning);
        }
        let shared = slot.handler.clone().ok_or(SessionError::NoTimeoutHandler)?;
        let handler: TimeoutHandler = Box::new(move |timeout: &mut PressTimeout| {
            let mut handler = shared.lock().unwrap_or_else(PoisonError::into_inner);
            (*handler)(timeout)
        });

        let settings = self.config.monitor;
        let monitor = PressTimeoutMonitor::new(
            Arc::clone(&self.press_state),
            self.dispatcher.sender(),
            Duration::from_millis(settings.timeout_ms),
            handler,
        );
        slot.running = Some(monitor.start(Duration::from_millis(settings.period_ms))?);
        Ok(())
    }

    /// Stop the press-timeout monitor if it is running
    pub fn disable_press_monitor(&self) {
        // Join outside the slot lock
        let running = self.monitor_slot().running.take();
        if let Some(mut handle) = running {
            handle.stop();
        }
    }

    /// Whether the monitor thread is scanning
    pub fn is_press_monitor_running(&self) -> bool {
        self.monitor_slot().running.is_some()
    }

    /// Release everything, stop the worker and clear press state.
    ///
    /// The release commands are best effort. Returns
    /// [`SessionError::WorkerStuck`] if the worker does not exit in time.
    /// Calling it again is a no-op.
    pub fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.disable_press_monitor();

        if let Err(e) = self.release_all_keys() {
            debug!("release-all-keys on close failed: {}", e);
        }
        if let Err(e) = self.release_all_buttons() {
            debug!("release-all-buttons on close failed: {}", e);
        }

        let result = self.dispatcher.shutdown(self.config.shutdown_timeout());
        self.press_state.clear();
        match &result {
            Ok(()) => info!("session closed"),
            Err(e) => warn!("session closed uncleanly: {}", e),
        }
        result
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("failed to close session: {}", e);
        }
    }
}
