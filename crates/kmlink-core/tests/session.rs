mod common;

use common::{fast_config, wait_until, Echo, StubDevice, Wire};
use kmlink_core::config::{MonitorSettings, Resolution, SessionConfig};
use kmlink_core::prelude::*;
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

fn open(echo: Echo, config: SessionConfig) -> (Session, Wire) {
    let (device, wire) = StubDevice::new(echo);
    (Session::with_channel(Box::new(device), config).unwrap(), wire)
}

fn key(usage: u8) -> KeyCode {
    KeyCode::new(usage).unwrap()
}

#[test]
fn test_press_state_follows_confirmed_commands() {
    let (session, _) = open(Echo::Always, fast_config());

    session.key_press(key(0x04)).unwrap();
    session.mouse_press_async(MouseButton::Left).unwrap().wait().unwrap();
    assert!(session.is_key_pressed(key(0x04)));
    assert!(session.is_button_pressed(MouseButton::Left));
    assert!(session.pressed_since(key(0x04)).is_some());

    session.key_release_async(key(0x04)).unwrap().wait().unwrap();
    session.mouse_release(MouseButton::Left).unwrap();
    assert!(!session.is_key_pressed(key(0x04)));
    assert!(!session.is_button_pressed(MouseButton::Left));
}

#[test]
fn test_release_all_clears_every_entry() {
    let (session, _) = open(Echo::Always, fast_config());
    for usage in [0x04, 0x16, 0xE1] {
        session.key_press(key(usage)).unwrap();
    }
    session.mouse_press(MouseButton::Right).unwrap();
    session.mouse_press(MouseButton::Middle).unwrap();

    session.release_all_keys().unwrap();
    let pressed = session.press_state().pressed();
    assert!(pressed.iter().all(|(id, _)| matches!(id, InputId::Button(_))));

    session.release_all_buttons_async().unwrap().wait().unwrap();
    assert!(session.press_state().pressed().is_empty());
}

#[test]
fn test_failed_press_is_not_recorded() {
    let (session, wire) = open(Echo::Never, fast_config());
    let err = session.key_press(key(0x04)).unwrap_err();
    assert!(err.is_delivery_failure());
    assert!(!session.is_key_pressed(key(0x04)));
    assert_eq!(wire.frames().len(), 3);
    assert_eq!(session.stats().failed, 1);
}

#[test]
fn test_absolute_move_checks_resolution() {
    let (session, wire) = open(Echo::Always, fast_config());
    assert_eq!(session.resolution(), Resolution::default());

    assert!(matches!(
        session.mouse_move(0, 10),
        Err(CommandError::Frame(FrameError::CoordinateOutOfRange { x: 0, .. }))
    ));
    assert!(session.mouse_move(2560, 1440).is_err());
    session.mouse_move(1920, 1080).unwrap();
    assert_eq!(wire.frames().len(), 1);

    session.set_resolution(2560, 1440).unwrap();
    assert_eq!(
        session.resolution(),
        Resolution {
            width: 2560,
            height: 1440
        }
    );
    session.mouse_move_async(2560, 1440).unwrap().wait().unwrap();
}

#[test]
fn test_unconfirmed_resolution_is_not_applied() {
    let (session, _) = open(Echo::Never, fast_config());
    assert!(session.set_resolution(800, 600).is_err());
    assert_eq!(session.resolution(), Resolution::default());
}

#[test]
fn test_resolution_sent_on_open() {
    let config = SessionConfig {
        resolution: Some(Resolution {
            width: 1280,
            height: 720,
        }),
        ..fast_config()
    };
    let (session, wire) = open(Echo::Always, config);
    assert_eq!(
        wire.frames()[0],
        Frame::mouse_resolution(1280, 720).wire_bytes().to_vec()
    );
    assert_eq!(session.resolution().width, 1280);
}

#[test]
fn test_close_releases_everything_once() {
    let (mut session, wire) = open(Echo::Always, fast_config());
    session.key_press(key(0x04)).unwrap();
    session.mouse_scroll(-2).unwrap();
    session.mouse_move_relative(5, -5).unwrap();

    session.close().unwrap();
    assert!(session.is_closed());
    assert!(session.press_state().pressed().is_empty());

    let frames = wire.frames();
    assert_eq!(frames.len(), 5);
    assert_eq!(frames[3], Frame::release_all_keys().wire_bytes().to_vec());
    assert_eq!(frames[4], Frame::release_all_buttons().wire_bytes().to_vec());

    session.close().unwrap();
    assert_eq!(wire.frames().len(), 5);
    assert!(matches!(
        session.key_press(key(0x04)),
        Err(CommandError::SessionClosed)
    ));
}

#[test]
fn test_close_with_silent_device_still_succeeds() {
    let (mut session, _) = open(Echo::Never, fast_config());
    session.close().unwrap();
}

#[test]
fn test_monitor_needs_handler_and_runs_once() {
    let (session, _) = open(Echo::Always, fast_config());
    assert!(matches!(
        session.enable_press_monitor(),
        Err(SessionError::NoTimeoutHandler)
    ));

    session.set_press_timeout_handler(|_| {});
    session.enable_press_monitor().unwrap();
    assert!(matches!(
        session.enable_press_monitor(),
        Err(SessionError::MonitorAlreadyRunning)
    ));

    session.disable_press_monitor();
    assert!(!session.is_press_monitor_running());
    session.enable_press_monitor().unwrap();
}

#[test]
fn test_monitor_releases_stale_press() {
    let config = SessionConfig {
        monitor: MonitorSettings {
            period_ms: 5,
            timeout_ms: 30,
        },
        ..fast_config()
    };
    let (session, wire) = open(Echo::Always, config);
    let stale = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&stale);
    session.set_press_timeout_handler(move |timeout| {
        seen.lock().unwrap().push(timeout.input);
        timeout.release = true;
    });
    session.enable_press_monitor().unwrap();

    let k = key(0x0E);
    session.key_press(k).unwrap();
    assert!(wait_until(|| !session.is_key_pressed(k)));
    session.disable_press_monitor();

    assert!(stale
        .lock()
        .unwrap()
        .iter()
        .all(|input| *input == InputId::Key(k)));
    let release = Frame::key_release(0x0E).wire_bytes().to_vec();
    assert!(wire.frames().contains(&release));
}

#[test]
fn test_silent_device_gets_one_release_at_a_time() {
    let config = SessionConfig {
        monitor: MonitorSettings {
            period_ms: 2,
            timeout_ms: 10,
        },
        ..fast_config()
    };
    let (session, wire) = open(Echo::Never, config);
    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);
    session.set_press_timeout_handler(move |timeout| {
        *counter.lock().unwrap() += 1;
        timeout.release = true;
    });

    let k = InputId::Key(key(0x04));
    session
        .press_state()
        .mark_pressed(k, chrono::Utc::now() - chrono::Duration::seconds(1));
    session.enable_press_monitor().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(150));

    assert!(session.queue_depth() <= 1);
    let release = Frame::key_release(0x04).wire_bytes().to_vec();
    let release_writes = wire.frames().iter().filter(|f| **f == release).count();
    // Three attempts per release, and a new one only after the last failed
    assert!(release_writes <= 3 * *calls.lock().unwrap());
    assert!(!matches!(
        session.mouse_scroll_async(1),
        Err(CommandError::QueueFull { .. })
    ));
    session.disable_press_monitor();
}

#[test]
fn test_report_hook_sees_every_send() {
    let (session, _) = open(Echo::Always, fast_config());
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    session
        .set_report_hook(Some(Box::new(move |report: &SendReport| {
            sink.lock().unwrap().push(report.clone());
        })))
        .unwrap();

    session.key_press(key(0x04)).unwrap();
    session.mouse_scroll_async(3).unwrap().wait().unwrap();

    assert!(wait_until(|| reports.lock().unwrap().len() == 2));
    let reports = reports.lock().unwrap();
    assert_eq!(reports[0].description, "KeyboardPress(0x04)");
    assert_eq!(reports[1].kind, FrameKind::MouseScroll);
    assert!(reports.iter().all(|r| r.confirmed && r.attempts == 1));
}
