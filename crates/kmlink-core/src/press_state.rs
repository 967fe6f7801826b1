//! Press state tracking
//!
//! Remembers when each key and button was last confirmed pressed. Every entry
//! is its own atomic slot, so queries, monitor scans and completion callbacks
//! never contend on a shared lock.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::dispatch::OnSuccess;
use crate::input::{InputId, KeyCode, MouseButton};
use crate::protocol::{Frame, FrameKind, RELEASE_ALL};

/// Slot value for "not pressed"
const NOT_PRESSED: i64 = i64::MIN;

fn encode(at: DateTime<Utc>) -> i64 {
    // Keep the sentinel unreachable
    at.timestamp_micros().max(NOT_PRESSED + 1)
}

fn decode(raw: i64) -> Option<DateTime<Utc>> {
    if raw == NOT_PRESSED {
        None
    } else {
        DateTime::from_timestamp_micros(raw)
    }
}

/// Last-press timestamps for every key and button
pub struct PressState {
    keys: [AtomicI64; 256],
    buttons: [AtomicI64; 3],
}

impl Default for PressState {
    fn default() -> Self {
        Self::new()
    }
}

impl PressState {
    /// Everything released
    pub fn new() -> Self {
        Self {
            keys: std::array::from_fn(|_| AtomicI64::new(NOT_PRESSED)),
            buttons: std::array::from_fn(|_| AtomicI64::new(NOT_PRESSED)),
        }
    }

    fn slot(&self, id: InputId) -> &AtomicI64 {
        match id {
            InputId::Key(key) => &self.keys[key.usage() as usize],
            InputId::Button(button) => &self.buttons[button.index()],
        }
    }

    /// Record a press at `at`
    pub fn mark_pressed(&self, id: InputId, at: DateTime<Utc>) {
        self.slot(id).store(encode(at), Ordering::Release);
    }

    /// Forget a press
    pub fn mark_released(&self, id: InputId) {
        self.slot(id).store(NOT_PRESSED, Ordering::Release);
    }

    /// When `id` was pressed, if it still is
    pub fn pressed_since(&self, id: InputId) -> Option<DateTime<Utc>> {
        decode(self.slot(id).load(Ordering::Acquire))
    }

    /// Whether `id` is currently pressed
    pub fn is_pressed(&self, id: InputId) -> bool {
        self.pressed_since(id).is_some()
    }

    /// Clear every key
    pub fn release_all_keys(&self) {
        for slot in &self.keys {
            slot.store(NOT_PRESSED, Ordering::Release);
        }
    }

    /// Clear every button
    pub fn release_all_buttons(&self) {
        for slot in &self.buttons {
            slot.store(NOT_PRESSED, Ordering::Release);
        }
    }

    /// Clear every key and button
    pub fn clear(&self) {
        self.release_all_keys();
        self.release_all_buttons();
    }

    /// Snapshot of everything currently pressed, keys first
    pub fn pressed(&self) -> Vec<(InputId, DateTime<Utc>)> {
        let keys = self.keys.iter().enumerate().filter_map(|(usage, slot)| {
            let at = decode(slot.load(Ordering::Acquire))?;
            let key = KeyCode::new(usage as u8).ok()?;
            Some((InputId::Key(key), at))
        });
        let buttons = MouseButton::ALL.into_iter().filter_map(|button| {
            let at = decode(self.buttons[button.index()].load(Ordering::Acquire))?;
            Some((InputId::Button(button), at))
        });
        keys.chain(buttons).collect()
    }

    /// Apply a frame the device has confirmed, pressed or released at `at`
    pub fn apply(&self, frame: &Frame, at: DateTime<Utc>) {
        let Some(value) = frame.value() else {
            return;
        };
        match frame.kind() {
            FrameKind::KeyboardPress => {
                if let Ok(key) = KeyCode::new(value) {
                    self.mark_pressed(InputId::Key(key), at);
                }
            }
            FrameKind::KeyboardRelease if value == RELEASE_ALL => self.release_all_keys(),
            FrameKind::KeyboardRelease => {
                if let Ok(key) = KeyCode::new(value) {
                    self.mark_released(InputId::Key(key));
                }
            }
            FrameKind::MousePress => {
                for button in MouseButton::from_mask(value) {
                    self.mark_pressed(InputId::Button(button), at);
                }
            }
            FrameKind::MouseRelease if value == RELEASE_ALL => self.release_all_buttons(),
            FrameKind::MouseRelease => {
                for button in MouseButton::from_mask(value) {
                    self.mark_released(InputId::Button(button));
                }
            }
            _ => {}
        }
    }

    /// Completion callback applying `frame` once confirmed, for frames that
    /// change press state
    pub fn on_confirmed(self: &Arc<Self>, frame: &Frame) -> Option<OnSuccess> {
        let tracked = matches!(
            frame.kind(),
            FrameKind::KeyboardPress
                | FrameKind::KeyboardRelease
                | FrameKind::MousePress
                | FrameKind::MouseRelease
        );
        if !tracked {
            return None;
        }
        let state = Arc::clone(self);
        let frame = frame.clone();
        Some(Box::new(move |at| state.apply(&frame, at)))
    }
}
