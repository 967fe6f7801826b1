//! Frame encoding/decoding
//!
//! Implements the binary command frame understood by the bridge firmware.
//!
//! Frame format:
//! - 1 byte: start marker `0xAB`
//! - 1 byte: remaining length (type + payload + checksum)
//! - 1 byte: command type
//! - 1 or 4 bytes: payload (a single value, or two little-endian u16 coordinates)
//! - 1 byte: XOR of the type and payload bytes

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::{FrameError, FRAME_START, MAX_FRAME_LEN, MIN_FRAME_LEN};

/// Payload value meaning "release everything" for the release kinds
pub const RELEASE_ALL: u8 = 0x00;

/// Command kinds understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    /// Relative pointer motion, signed dx/dy
    MouseMoveRelative,
    /// Absolute pointer position, 1-based
    MouseMove,
    /// Wheel scroll, signed steps
    MouseScroll,
    /// Press the buttons in a mask
    MousePress,
    /// Release the buttons in a mask (0 releases all)
    MouseRelease,
    /// Set the absolute coordinate space
    MouseResolution,
    /// Press a HID usage code
    KeyboardPress,
    /// Release a HID usage code (0 releases all)
    KeyboardRelease,
}

/// Shape of a frame's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadShape {
    /// One byte
    Value,
    /// Two little-endian u16 values
    Coordinates,
}

impl FrameKind {
    /// Every kind, in type byte order
    pub const ALL: [FrameKind; 8] = [
        FrameKind::MouseMoveRelative,
        FrameKind::MouseMove,
        FrameKind::MouseScroll,
        FrameKind::MousePress,
        FrameKind::MouseRelease,
        FrameKind::MouseResolution,
        FrameKind::KeyboardPress,
        FrameKind::KeyboardRelease,
    ];

    /// Get the wire type byte
    pub fn type_byte(self) -> u8 {
        match self {
            FrameKind::MouseMoveRelative => 0xA0,
            FrameKind::MouseMove => 0xAA,
            FrameKind::MouseScroll => 0xAB,
            FrameKind::MousePress => 0xAC,
            FrameKind::MouseRelease => 0xAD,
            FrameKind::MouseResolution => 0xAE,
            FrameKind::KeyboardPress => 0xBB,
            FrameKind::KeyboardRelease => 0xBC,
        }
    }

    /// Look up a kind by its wire type byte
    pub fn from_type_byte(byte: u8) -> Result<Self, FrameError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_byte() == byte)
            .ok_or(FrameError::InvalidFrameKind(byte))
    }

    /// Payload shape this kind carries
    pub fn shape(self) -> PayloadShape {
        match self {
            FrameKind::MouseMoveRelative | FrameKind::MouseMove | FrameKind::MouseResolution => {
                PayloadShape::Coordinates
            }
            _ => PayloadShape::Value,
        }
    }

    /// Total frame length on the wire, header and checksum included
    pub fn frame_len(self) -> usize {
        match self.shape() {
            PayloadShape::Value => MIN_FRAME_LEN,
            PayloadShape::Coordinates => MAX_FRAME_LEN,
        }
    }

    /// Pointer motion is sent at high rate and retried on its own schedule
    pub fn is_pointer_motion(self) -> bool {
        matches!(
            self,
            FrameKind::MouseMoveRelative | FrameKind::MouseMove | FrameKind::MouseScroll
        )
    }
}

impl TryFrom<u8> for FrameKind {
    type Error = FrameError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_type_byte(byte)
    }
}

/// Frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Payload {
    /// Key code, button mask or scroll delta
    Value(u8),
    /// x/y, dx/dy or width/height
    Coordinates(u16, u16),
}

impl Payload {
    /// Shape of this payload
    pub fn shape(&self) -> PayloadShape {
        match self {
            Payload::Value(_) => PayloadShape::Value,
            Payload::Coordinates(..) => PayloadShape::Coordinates,
        }
    }
}

/// XOR of all bytes, first byte as seed
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// One immutable command frame.
///
/// The wire bytes are assembled once at construction and every retry of a
/// send reuses the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    payload: Payload,
    wire: [u8; MAX_FRAME_LEN],
}

impl Frame {
    /// Build a frame, checking the payload shape against the kind
    pub fn new(kind: FrameKind, payload: Payload) -> Result<Self, FrameError> {
        if payload.shape() != kind.shape() {
            return Err(FrameError::PayloadShapeMismatch {
                kind,
                expected: kind.shape(),
                actual: payload.shape(),
            });
        }
        Ok(Self::assemble(kind, payload))
    }

    /// Build a frame from a raw type byte
    pub fn encode(type_byte: u8, payload: Payload) -> Result<Self, FrameError> {
        Self::new(FrameKind::from_type_byte(type_byte)?, payload)
    }

    /// Press a HID usage code
    pub fn key_press(code: u8) -> Self {
        Self::assemble(FrameKind::KeyboardPress, Payload::Value(code))
    }

    /// Release a HID usage code
    pub fn key_release(code: u8) -> Self {
        Self::assemble(FrameKind::KeyboardRelease, Payload::Value(code))
    }

    /// Release every pressed key
    pub fn release_all_keys() -> Self {
        Self::key_release(RELEASE_ALL)
    }

    /// Press the buttons in `mask`
    pub fn mouse_press(mask: u8) -> Self {
        Self::assemble(FrameKind::MousePress, Payload::Value(mask))
    }

    /// Release the buttons in `mask`
    pub fn mouse_release(mask: u8) -> Self {
        Self::assemble(FrameKind::MouseRelease, Payload::Value(mask))
    }

    /// Release every pressed button
    pub fn release_all_buttons() -> Self {
        Self::mouse_release(RELEASE_ALL)
    }

    /// Move the pointer to an absolute position (not range checked here)
    pub fn mouse_move(x: u16, y: u16) -> Self {
        Self::assemble(FrameKind::MouseMove, Payload::Coordinates(x, y))
    }

    /// Move the pointer by a signed offset
    pub fn mouse_move_relative(dx: i16, dy: i16) -> Self {
        Self::assemble(
            FrameKind::MouseMoveRelative,
            Payload::Coordinates(dx as u16, dy as u16),
        )
    }

    /// Scroll the wheel by signed steps
    pub fn mouse_scroll(delta: i8) -> Self {
        Self::assemble(FrameKind::MouseScroll, Payload::Value(delta as u8))
    }

    /// Set the absolute coordinate space
    pub fn mouse_resolution(width: u16, height: u16) -> Self {
        Self::assemble(FrameKind::MouseResolution, Payload::Coordinates(width, height))
    }

    fn assemble(kind: FrameKind, payload: Payload) -> Self {
        let len = kind.frame_len();
        let mut wire = [0u8; MAX_FRAME_LEN];
        wire[0] = FRAME_START;
        wire[1] = (len - 2) as u8;
        wire[2] = kind.type_byte();
        match payload {
            Payload::Value(value) => wire[3] = value,
            Payload::Coordinates(a, b) => {
                LittleEndian::write_u16(&mut wire[3..5], a);
                LittleEndian::write_u16(&mut wire[5..7], b);
            }
        }
        wire[len - 1] = xor_checksum(&wire[2..len - 1]);
        Self {
            kind,
            payload,
            wire,
        }
    }

    /// Decode a frame from raw bytes, validating every structural invariant
    pub fn decode_and_validate(bytes: &[u8]) -> Result<Self, FrameError> {
        let len = bytes.len();
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&len) {
            return Err(FrameError::InvalidLength(len));
        }
        if bytes[0] != FRAME_START {
            return Err(FrameError::BadStartMarker(bytes[0]));
        }

        let declared = bytes[1] as usize;
        if declared != len - 2 {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: len - 2,
            });
        }

        let kind = FrameKind::from_type_byte(bytes[2])?;
        if kind.frame_len() != len {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: kind.frame_len() - 2,
            });
        }

        let expected = xor_checksum(&bytes[2..len - 1]);
        let actual = bytes[len - 1];
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        let payload = match kind.shape() {
            PayloadShape::Value => Payload::Value(bytes[3]),
            PayloadShape::Coordinates => Payload::Coordinates(
                LittleEndian::read_u16(&bytes[3..5]),
                LittleEndian::read_u16(&bytes[5..7]),
            ),
        };
        Ok(Self::assemble(kind, payload))
    }

    /// Command kind
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Command payload
    pub fn payload(&self) -> Payload {
        self.payload
    }

    /// Single-byte payload, if this kind carries one
    pub fn value(&self) -> Option<u8> {
        match self.payload {
            Payload::Value(value) => Some(value),
            Payload::Coordinates(..) => None,
        }
    }

    /// Fully assembled bytes as written to the wire
    pub fn wire_bytes(&self) -> &[u8] {
        &self.wire[..self.kind.frame_len()]
    }

    /// Trailing checksum byte
    pub fn checksum(&self) -> u8 {
        self.wire[self.kind.frame_len() - 1]
    }

    /// True for the release kinds carrying the release-all payload
    pub fn is_release_all(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::KeyboardRelease | FrameKind::MouseRelease
        ) && self.payload == Payload::Value(RELEASE_ALL)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.payload) {
            (FrameKind::MouseMoveRelative, Payload::Coordinates(dx, dy)) => {
                write!(f, "MouseMoveRelative({}, {})", dx as i16, dy as i16)
            }
            (FrameKind::MouseScroll, Payload::Value(delta)) => {
                write!(f, "MouseScroll({})", delta as i8)
            }
            (kind, Payload::Value(_)) if self.is_release_all() => write!(f, "{:?}(all)", kind),
            (kind, Payload::Value(value)) => write!(f, "{:?}({:#04x})", kind, value),
            (kind, Payload::Coordinates(a, b)) => write!(f, "{:?}({}, {})", kind, a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_press_wire_layout() {
        let frame = Frame::key_press(0x04);
        assert_eq!(frame.wire_bytes(), &[0xAB, 0x03, 0xBB, 0x04, 0xBB ^ 0x04]);
    }

    #[test]
    fn test_mouse_move_little_endian() {
        let frame = Frame::mouse_move(0x0102, 0x0304);
        let bytes = frame.wire_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..7], &[0xAB, 0x06, 0xAA, 0x02, 0x01, 0x04, 0x03]);
        assert_eq!(bytes[7], 0xAA ^ 0x02 ^ 0x01 ^ 0x04 ^ 0x03);
    }

    #[test]
    fn test_relative_move_keeps_sign() {
        let frame = Frame::mouse_move_relative(-1, 2);
        assert_eq!(&frame.wire_bytes()[3..7], &[0xFF, 0xFF, 0x02, 0x00]);
        assert_eq!(frame.to_string(), "MouseMoveRelative(-1, 2)");
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = Frame::new(FrameKind::KeyboardPress, Payload::Coordinates(1, 2)).unwrap_err();
        assert_eq!(
            err,
            FrameError::PayloadShapeMismatch {
                kind: FrameKind::KeyboardPress,
                expected: PayloadShape::Value,
                actual: PayloadShape::Coordinates,
            }
        );
        assert!(Frame::new(FrameKind::MouseMove, Payload::Value(1)).is_err());
    }

    #[test]
    fn test_unknown_type_byte() {
        assert_eq!(
            Frame::encode(0x42, Payload::Value(1)).unwrap_err(),
            FrameError::InvalidFrameKind(0x42)
        );
    }

    #[test]
    fn test_decode_rejects_bad_length_byte() {
        let mut bytes = Frame::key_press(0x05).wire_bytes().to_vec();
        bytes[1] = 0x06;
        assert!(matches!(
            Frame::decode_and_validate(&bytes),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_coordinate_frame() {
        // A coordinate kind squeezed into a 5 byte frame
        let mut bytes = vec![0xAB, 0x03, 0xAA, 0x01];
        bytes.push(xor_checksum(&bytes[2..]));
        assert!(matches!(
            Frame::decode_and_validate(&bytes),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_release_all_display() {
        assert_eq!(Frame::release_all_keys().to_string(), "KeyboardRelease(all)");
        assert_eq!(Frame::mouse_press(0x01).to_string(), "MousePress(0x01)");
    }
}
