//! Send / retry / loopback-confirm state machine
//!
//! The bridge firmware has no acknowledgement code: a command counts as
//! delivered only when the exact frame bytes come back on the same line.
//! [`Transport::send`] writes a frame, waits for that echo, and retries a
//! bounded number of times with a jittered pause in between.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::{
    channel::ByteChannel,
    report::{Reporter, SendReport},
    DeliveryError, Frame, DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_BAUD_RATE, DEFAULT_MAX_ATTEMPTS,
};

/// Pause between attempts: `base` plus a uniform offset in `-jitter..=jitter`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Nominal pause
    pub base: Duration,
    /// Largest offset either side of `base`
    pub jitter: Duration,
}

impl RetryPolicy {
    /// No pause at all
    pub const IMMEDIATE: RetryPolicy = RetryPolicy {
        base: Duration::ZERO,
        jitter: Duration::ZERO,
    };

    /// Policy pausing `base` ± `jitter`
    pub fn new(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    /// Draw one backoff delay, never negative
    pub fn delay(&self) -> Duration {
        let jitter = self.jitter.as_micros() as i64;
        let offset = if jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(-jitter..=jitter)
        };
        let micros = (self.base.as_micros() as i64 + offset).max(0);
        Duration::from_micros(micros as u64)
    }
}

/// Timing knobs for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Line rate, used to widen the echo window for slow links
    pub baud_rate: u32,
    /// Time allowed for the echo after the write completes
    pub attempt_timeout: Duration,
    /// Total attempts before giving up
    pub max_attempts: u32,
    /// Backoff for pointer motion and scroll
    pub pointer_retry: RetryPolicy,
    /// Backoff for key and button commands
    pub discrete_retry: RetryPolicy,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pointer_retry: RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(5)),
            discrete_retry: RetryPolicy::new(
                Duration::from_millis(120),
                Duration::from_millis(20),
            ),
        }
    }
}

impl TransportSettings {
    fn retry_policy(&self, frame: &Frame) -> RetryPolicy {
        if frame.kind().is_pointer_motion() {
            self.pointer_retry
        } else {
            self.discrete_retry
        }
    }

    /// Echo window for a frame of `len` bytes: the configured timeout plus the
    /// time to clock the frame out and back at the line rate (10 bits per byte).
    pub fn echo_window(&self, len: usize) -> Duration {
        let baud = if self.baud_rate == 0 {
            DEFAULT_BAUD_RATE
        } else {
            self.baud_rate
        };
        let bits = (2 * len * 10) as u64;
        self.attempt_timeout + Duration::from_nanos(bits * 1_000_000_000 / baud as u64)
    }
}

/// Cumulative counters, readable while a send is in progress
#[derive(Debug, Default)]
pub struct TransportStats {
    confirmed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    tx_bytes: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Commands confirmed by echo
    pub confirmed: u64,
    /// Commands that exhausted their attempts or hit a channel fault
    pub failed: u64,
    /// Attempts beyond the first
    pub retries: u64,
    /// Bytes written to the channel
    pub tx_bytes: u64,
}

impl TransportStats {
    /// Copy the counters as they are now
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            confirmed: self.confirmed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive owner of the byte channel
pub struct Transport {
    channel: Box<dyn ByteChannel>,
    settings: TransportSettings,
    reporter: Option<Reporter>,
    stats: Arc<TransportStats>,
}

impl Transport {
    /// Wrap a channel
    pub fn new(channel: Box<dyn ByteChannel>, settings: TransportSettings) -> Self {
        Self {
            channel,
            settings,
            reporter: None,
            stats: Arc::new(TransportStats::default()),
        }
    }

    /// Install or remove the send report forwarder
    pub fn set_reporter(&mut self, reporter: Option<Reporter>) {
        self.reporter = reporter;
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    /// Send one frame and wait for its echo, retrying up to `max_attempts`.
    ///
    /// Returns the time taken immediately before the write that got confirmed.
    pub fn send(&mut self, frame: &Frame) -> Result<DateTime<Utc>, DeliveryError> {
        let wire = frame.wire_bytes();
        let policy = self.settings.retry_policy(frame);
        let window = self.settings.echo_window(wire.len());
        let max_attempts = self.settings.max_attempts.max(1);

        let mut send_time = Utc::now();
        let mut attempts = 0;
        let mut outcome = Err(DeliveryError::NotResponding {
            attempts: max_attempts,
        });

        for attempt in 1..=max_attempts {
            attempts = attempt;
            if attempt > 1 {
                self.stats.retries.fetch_add(1, Ordering::Relaxed);
            }

            send_time = Utc::now();
            trace!(%frame, attempt, "sending");
            match self.write_and_await_echo(wire, window) {
                Ok(true) => {
                    trace!(%frame, attempt, "echo confirmed");
                    outcome = Ok(send_time);
                    break;
                }
                Ok(false) => {
                    debug!(%frame, attempt, window_us = window.as_micros() as u64, "no echo");
                    // A late partial echo must not leak into the next attempt
                    if let Err(source) = self.channel.discard_input() {
                        outcome = Err(DeliveryError::Channel { attempt, source });
                        break;
                    }
                    if attempt < max_attempts {
                        let delay = policy.delay();
                        if !delay.is_zero() {
                            thread::sleep(delay);
                        }
                    }
                }
                Err(source) => {
                    warn!(%frame, attempt, "channel fault: {}", source);
                    outcome = Err(DeliveryError::Channel { attempt, source });
                    break;
                }
            }
        }

        match &outcome {
            Ok(_) => self.stats.confirmed.fetch_add(1, Ordering::Relaxed),
            Err(e) => {
                warn!(%frame, "{}", e);
                self.stats.failed.fetch_add(1, Ordering::Relaxed)
            }
        };

        if let Some(reporter) = &self.reporter {
            reporter.notify(SendReport {
                description: frame.to_string(),
                kind: frame.kind(),
                send_time,
                attempts,
                confirmed: outcome.is_ok(),
            });
        }

        outcome
    }

    /// One attempt: write the frame, then match incoming bytes against it
    /// until the whole frame has been seen in order or the window closes.
    fn write_and_await_echo(&mut self, wire: &[u8], window: Duration) -> io::Result<bool> {
        self.channel.write_all(wire)?;
        self.channel.flush()?;
        self.stats
            .tx_bytes
            .fetch_add(wire.len() as u64, Ordering::Relaxed);

        let deadline = Instant::now() + window;
        let mut matched = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let Some(byte) = self.channel.read_byte(remaining)? else {
                continue;
            };

            if byte == wire[matched] {
                matched += 1;
                if matched == wire.len() {
                    return Ok(true);
                }
            } else {
                // Restart, letting this byte open a new match
                matched = usize::from(byte == wire[0]);
            }
        }
    }
}
