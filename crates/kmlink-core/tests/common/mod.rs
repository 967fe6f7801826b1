//! Stub bridge device shared by the integration tests
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use kmlink_core::config::{RetrySettings, SessionConfig};
use kmlink_core::protocol::{ByteChannel, RetryPolicy, TransportSettings};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// One write seen by the device
#[derive(Debug, Clone)]
pub struct WireWrite {
    pub at: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

/// When the device echoes a write
#[derive(Debug, Clone, Copy)]
pub enum Echo {
    /// Every write comes straight back
    Always,
    /// Nothing ever comes back
    Never,
    /// Only writes numbered above `n` (1-based, counted across the session)
    After(usize),
}

#[derive(Default)]
struct WireState {
    writes: Mutex<Vec<WireWrite>>,
    held: Mutex<bool>,
    released: Condvar,
}

/// Test-side view of the stub device
#[derive(Clone, Default)]
pub struct Wire {
    state: Arc<WireState>,
}

impl Wire {
    pub fn writes(&self) -> Vec<WireWrite> {
        self.state.writes.lock().unwrap().clone()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.writes().into_iter().map(|w| w.bytes).collect()
    }

    /// Block every following write until [`release`](Self::release)
    pub fn hold(&self) {
        *self.state.held.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.state.held.lock().unwrap() = false;
        self.state.released.notify_all();
    }
}

/// Byte channel standing in for the bridge board
pub struct StubDevice {
    wire: Wire,
    echo: Echo,
    fail_writes: bool,
    inbound: VecDeque<u8>,
}

impl StubDevice {
    pub fn new(echo: Echo) -> (Self, Wire) {
        let wire = Wire::default();
        (
            Self {
                wire: wire.clone(),
                echo,
                fail_writes: false,
                inbound: VecDeque::new(),
            },
            wire,
        )
    }

    /// Device whose writes always fail with a broken pipe
    pub fn broken() -> (Self, Wire) {
        let (mut device, wire) = Self::new(Echo::Never);
        device.fail_writes = true;
        (device, wire)
    }
}

impl ByteChannel for StubDevice {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        {
            let held = self.wire.state.held.lock().unwrap();
            let _held = self
                .wire
                .state
                .released
                .wait_while(held, |held| *held)
                .unwrap();
        }
        let count = {
            let mut writes = self.wire.state.writes.lock().unwrap();
            writes.push(WireWrite {
                at: Utc::now(),
                bytes: bytes.to_vec(),
            });
            writes.len()
        };
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        let echo = match self.echo {
            Echo::Always => true,
            Echo::Never => false,
            Echo::After(n) => count > n,
        };
        if echo {
            self.inbound.extend(bytes.iter().copied());
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        match self.inbound.pop_front() {
            Some(byte) => Ok(Some(byte)),
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.inbound.clear();
        Ok(())
    }
}

pub const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(5);

/// Transport timing with a short echo window and no backoff
pub fn fast_settings() -> TransportSettings {
    TransportSettings {
        attempt_timeout: ATTEMPT_TIMEOUT,
        pointer_retry: RetryPolicy::IMMEDIATE,
        discrete_retry: RetryPolicy::IMMEDIATE,
        ..TransportSettings::default()
    }
}

/// Session config matching [`fast_settings`]
pub fn fast_config() -> SessionConfig {
    let no_backoff = RetrySettings {
        base_ms: 0,
        jitter_ms: 0,
    };
    SessionConfig {
        attempt_timeout_ms: ATTEMPT_TIMEOUT.as_millis() as u64,
        pointer_retry: no_backoff,
        discrete_retry: no_backoff,
        queue_ceiling: 4,
        shutdown_timeout_ms: 500,
        ..SessionConfig::default()
    }
}

/// Poll `condition` every millisecond for up to a second
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
