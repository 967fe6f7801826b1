//! # kmlink Core Library
//!
//! Host side of a USB HID keyboard/mouse bridge driven over a serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame encoding and validation for the bridge's command set
//! - Echo-confirmed delivery with bounded, jittered retries
//! - Blocking and queued (future-returning) send paths
//! - Key and button press tracking, with a stale-press monitor
//! - JSON session configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use kmlink_core::prelude::*;
//!
//! let mut session = Session::open(SessionConfig::for_port("/dev/ttyACM0"))?;
//! let a = KeyCode::new(0x04)?;
//! session.key_press(a)?;
//! session.key_release(a)?;
//! session.mouse_move(960, 540)?;
//! session.close()?;
//! ```

pub mod config;
pub mod dispatch;
pub mod input;
pub mod monitor;
pub mod press_state;
pub mod protocol;
pub mod session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{MonitorSettings, Resolution, RetrySettings, SessionConfig};
    pub use crate::dispatch::CommandFuture;
    pub use crate::input::{InputId, KeyCode, MouseButton};
    pub use crate::monitor::PressTimeout;
    pub use crate::protocol::{
        list_ports, CommandError, DeliveryError, Frame, FrameError, FrameKind, PortInfo,
        SendReport,
    };
    pub use crate::session::{Session, SessionError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
