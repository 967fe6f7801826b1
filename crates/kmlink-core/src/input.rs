//! Logical inputs
//!
//! Identifies the keys and buttons whose press state is tracked. Key codes are
//! raw HID usage IDs (keyboard page 0x07); translating platform key codes to
//! usages is left to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{Frame, FrameError};

/// HID usage code of a keyboard key. `0x00` is reserved for release-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct KeyCode(u8);

impl KeyCode {
    /// Wrap a usage code, rejecting the reserved `0x00`
    pub fn new(usage: u8) -> Result<Self, FrameError> {
        if usage == 0 {
            Err(FrameError::ReservedKeyCode)
        } else {
            Ok(Self(usage))
        }
    }

    /// Raw usage code
    pub fn usage(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for KeyCode {
    type Error = FrameError;

    fn try_from(usage: u8) -> Result<Self, Self::Error> {
        Self::new(usage)
    }
}

impl From<KeyCode> for u8 {
    fn from(key: KeyCode) -> u8 {
        key.0
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key {:#04x}", self.0)
    }
}

/// Mouse buttons known to the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    /// Mask bit 0x01
    Left,
    /// Mask bit 0x02
    Right,
    /// Mask bit 0x04
    Middle,
}

impl MouseButton {
    /// Every button, in mask bit order
    pub const ALL: [MouseButton; 3] = [MouseButton::Left, MouseButton::Right, MouseButton::Middle];

    /// Bit in the press/release mask
    pub fn mask(self) -> u8 {
        match self {
            MouseButton::Left => 0x01,
            MouseButton::Right => 0x02,
            MouseButton::Middle => 0x04,
        }
    }

    /// Buttons whose bits are set in `mask`
    pub fn from_mask(mask: u8) -> impl Iterator<Item = MouseButton> {
        Self::ALL.into_iter().filter(move |b| mask & b.mask() != 0)
    }

    pub(crate) fn index(self) -> usize {
        match self {
            MouseButton::Left => 0,
            MouseButton::Right => 1,
            MouseButton::Middle => 2,
        }
    }
}

/// A key or a button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputId {
    /// Keyboard key
    Key(KeyCode),
    /// Mouse button
    Button(MouseButton),
}

impl InputId {
    /// Frame releasing this input
    pub fn release_frame(self) -> Frame {
        match self {
            InputId::Key(key) => Frame::key_release(key.usage()),
            InputId::Button(button) => Frame::mouse_release(button.mask()),
        }
    }
}

impl From<KeyCode> for InputId {
    fn from(key: KeyCode) -> Self {
        InputId::Key(key)
    }
}

impl From<MouseButton> for InputId {
    fn from(button: MouseButton) -> Self {
        InputId::Button(button)
    }
}
