//! Protocol errors

use std::io;

use thiserror::Error;

use super::frame::{FrameKind, PayloadShape};

/// Errors raised while building or validating a frame.
///
/// These are caller/input errors: they fail at the call site and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Type byte outside the command set
    #[error("Unknown frame kind: {0:#04x}")]
    InvalidFrameKind(u8),

    /// Payload does not fit the frame kind
    #[error("{kind:?} expects a {expected:?} payload, got {actual:?}")]
    PayloadShapeMismatch {
        /// Frame kind being built
        kind: FrameKind,
        /// Shape the kind requires
        expected: PayloadShape,
        /// Shape that was supplied
        actual: PayloadShape,
    },

    /// Raw frame too short or too long
    #[error("Frame length {0} outside of 5..=8 bytes")]
    InvalidLength(usize),

    /// First byte is not `0xAB`
    #[error("Bad start marker: {0:#04x}")]
    BadStartMarker(u8),

    /// Length byte disagrees with the bytes present
    #[error("Length field says {declared} remaining bytes, frame carries {actual}")]
    LengthMismatch {
        /// Remaining bytes claimed by the length byte
        declared: usize,
        /// Remaining bytes actually present
        actual: usize,
    },

    /// Trailing XOR byte is wrong
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the frame
        expected: u8,
        /// Checksum carried by the frame
        actual: u8,
    },

    /// Absolute position outside the current resolution
    #[error("Coordinate ({x}, {y}) outside of 1..={width} x 1..={height}")]
    CoordinateOutOfRange {
        /// Requested x
        x: u16,
        /// Requested y
        y: u16,
        /// Current width
        width: u16,
        /// Current height
        height: u16,
    },

    /// Usage 0 cannot name a single key
    #[error("Key code 0x00 is reserved for release-all")]
    ReservedKeyCode,
}

/// Why a command was not confirmed by the device.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// No echo within any attempt's window
    #[error("Device did not echo the command after {attempts} attempts")]
    NotResponding {
        /// Attempts made
        attempts: u32,
    },

    /// The channel itself failed; not retried
    #[error("Serial channel fault on attempt {attempt}: {source}")]
    Channel {
        /// Attempt on which the fault happened, from 1
        attempt: u32,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// Errors resolved on a command's completion handle.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Rejected before any I/O
    #[error("Invalid frame: {0}")]
    Frame(#[from] FrameError),

    /// The worker queue is at its ceiling
    #[error("Command queue full ({depth} pending, ceiling {ceiling})")]
    QueueFull {
        /// Commands waiting when the submit was rejected
        depth: usize,
        /// Configured queue ceiling
        ceiling: usize,
    },

    /// Sent but never confirmed
    #[error("Command failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// The session was closed before the command ran
    #[error("Session closed")]
    SessionClosed,
}

impl CommandError {
    /// True when the command was attempted on the wire and did not happen.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, CommandError::Delivery(_))
    }

    /// True when the caller should slow down and resubmit later.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, CommandError::QueueFull { .. })
    }
}
