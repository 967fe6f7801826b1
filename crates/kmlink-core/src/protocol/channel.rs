//! Byte channel abstraction
//!
//! The transport only needs four primitives from the link: write, flush,
//! single-byte read with a timeout, and discarding unread input.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Abstraction for the physical byte link to the bridge board
pub trait ByteChannel: Send {
    /// Write every byte of `bytes`
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Push buffered output to the device
    fn flush(&mut self) -> io::Result<()>;

    /// Read one byte, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;

    /// Drop any bytes received but not yet read
    fn discard_input(&mut self) -> io::Result<()>;
}

impl<C: ByteChannel + ?Sized> ByteChannel for Box<C> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        (**self).read_byte(timeout)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }
}

/// Serial port wrapper implementing ByteChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    /// Read timeout currently programmed into the port
    read_timeout: Option<Duration>,
}

impl SerialChannel {
    /// Wrap an open, configured port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            read_timeout: None,
        }
    }

    /// Name of the underlying port, if the OS reports one
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        // Reprogramming the port costs a syscall, skip it when unchanged
        if self.read_timeout != Some(timeout) {
            self.port.set_timeout(timeout).map_err(io::Error::other)?;
            self.read_timeout = Some(timeout);
        }
        Ok(())
    }
}

impl ByteChannel for SerialChannel {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        if timeout.is_zero() {
            return Ok(None);
        }
        self.set_read_timeout(timeout)?;

        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}
