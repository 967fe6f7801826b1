//! Serial Protocol Communication
//!
//! Implements the framed command protocol spoken by the keyboard/mouse bridge
//! firmware, and the echo-confirmed transport that delivers it.

pub mod channel;
mod error;
pub mod frame;
pub mod report;
pub mod serial;
pub mod transport;

pub use channel::{ByteChannel, SerialChannel};
pub use error::{CommandError, DeliveryError, FrameError};
pub use frame::{xor_checksum, Frame, FrameKind, Payload, PayloadShape, RELEASE_ALL};
pub use report::{ReportHook, Reporter, SendReport};
pub use serial::{list_ports, open_port, PortInfo};
pub use transport::{RetryPolicy, StatsSnapshot, Transport, TransportSettings, TransportStats};

/// Default baud rate of the bridge firmware
pub const DEFAULT_BAUD_RATE: u32 = 500_000;

/// Default time allowed for the echo of one attempt, in milliseconds
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 15;

/// Default number of send attempts per command
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// First byte of every frame
pub const FRAME_START: u8 = 0xAB;

/// Shortest frame: marker, length, type, one value byte, checksum
pub const MIN_FRAME_LEN: usize = 5;

/// Longest frame: marker, length, type, four coordinate bytes, checksum
pub const MAX_FRAME_LEN: usize = 8;
