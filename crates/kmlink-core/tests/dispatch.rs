mod common;

use common::{fast_settings, wait_until, Echo, StubDevice, Wire};
use kmlink_core::dispatch::Dispatcher;
use kmlink_core::protocol::{CommandError, Frame, Transport};
use kmlink_core::session::SessionError;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn spawn_dispatcher(echo: Echo, ceiling: usize) -> (Dispatcher, Wire) {
    let (device, wire) = StubDevice::new(echo);
    let transport = Transport::new(Box::new(device), fast_settings());
    (
        Dispatcher::spawn(transport, ceiling, Duration::from_micros(200)).unwrap(),
        wire,
    )
}

/// Park the worker inside a write so the queue can fill up behind it
fn stall_worker(dispatcher: &Dispatcher, wire: &Wire) -> kmlink_core::dispatch::CommandFuture {
    wire.hold();
    let in_flight = dispatcher.submit(Frame::key_press(0x1E), None).unwrap();
    assert!(wait_until(|| dispatcher.queue_depth() == 0));
    in_flight
}

#[test]
fn test_queued_commands_written_in_order() {
    let (dispatcher, wire) = spawn_dispatcher(Echo::Always, 8);
    let frames = [
        Frame::key_press(0x04),
        Frame::key_press(0x05),
        Frame::key_press(0x06),
    ];

    let futures: Vec<_> = frames
        .iter()
        .map(|f| dispatcher.submit(f.clone(), None).unwrap())
        .collect();
    for future in futures {
        future.wait().unwrap();
    }

    let expected: Vec<Vec<u8>> = frames.iter().map(|f| f.wire_bytes().to_vec()).collect();
    assert_eq!(wire.frames(), expected);
}

#[test]
fn test_full_queue_rejects_immediately() {
    let (dispatcher, wire) = spawn_dispatcher(Echo::Always, 2);
    let in_flight = stall_worker(&dispatcher, &wire);

    let queued: Vec<_> = (0..2)
        .map(|i| dispatcher.submit(Frame::mouse_scroll(i), None).unwrap())
        .collect();
    let err = dispatcher
        .submit(Frame::mouse_scroll(9), None)
        .unwrap_err();
    assert!(matches!(err, CommandError::QueueFull { depth: 2, ceiling: 2 }));
    assert!(err.is_backpressure());

    wire.release();
    in_flight.wait().unwrap();
    for future in queued {
        future.wait().unwrap();
    }
    assert_eq!(wire.frames().len(), 3);
}

#[tokio::test]
async fn test_future_resolves_in_async_context() {
    let (dispatcher, wire) = spawn_dispatcher(Echo::Always, 4);
    dispatcher
        .submit(Frame::mouse_move_relative(-3, 7), None)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(wire.frames().len(), 1);

    let (silent, _) = spawn_dispatcher(Echo::Never, 4);
    let err = silent
        .submit(Frame::key_press(0x04), None)
        .unwrap()
        .await
        .unwrap_err();
    assert!(err.is_delivery_failure());
}

#[test]
fn test_shutdown_resolves_pending_and_reports_wedged_worker() {
    let (mut dispatcher, wire) = spawn_dispatcher(Echo::Always, 4);
    let in_flight = stall_worker(&dispatcher, &wire);
    let pending = dispatcher.submit(Frame::key_press(0x04), None).unwrap();

    let err = dispatcher
        .shutdown(Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, SessionError::WorkerStuck { .. }));
    assert!(matches!(pending.wait(), Err(CommandError::SessionClosed)));
    assert!(matches!(
        dispatcher.submit(Frame::key_press(0x05), None),
        Err(CommandError::SessionClosed)
    ));
    assert!(matches!(
        dispatcher.send(Frame::key_press(0x05), None),
        Err(CommandError::SessionClosed)
    ));

    // Once the channel unblocks the in-flight command still completes
    wire.release();
    in_flight.wait().unwrap();
    dispatcher.shutdown(Duration::from_secs(1)).unwrap();
    assert_eq!(wire.frames().len(), 1);
}

/// Position of each of `wanted` in `writes`, in order, if all are present
fn subsequence_positions(writes: &[Vec<u8>], wanted: &[Frame]) -> Option<Vec<usize>> {
    let mut from = 0;
    let mut positions = Vec::new();
    for frame in wanted {
        let offset = writes[from..]
            .iter()
            .position(|w| w.as_slice() == frame.wire_bytes())?;
        positions.push(from + offset);
        from += offset + 1;
    }
    Some(positions)
}

#[test]
fn test_blocking_and_queued_paths_each_keep_their_order() {
    let (dispatcher, wire) = spawn_dispatcher(Echo::Always, 8);
    let queued: Vec<Frame> = (0x04..0x09).map(Frame::key_press).collect();
    let blocking: Vec<Frame> = (1..6).map(Frame::mouse_scroll).collect();

    std::thread::scope(|s| {
        s.spawn(|| {
            for frame in &blocking {
                dispatcher.send(frame.clone(), None).unwrap();
            }
        });
        let futures: Vec<_> = queued
            .iter()
            .map(|f| dispatcher.submit(f.clone(), None).unwrap())
            .collect();
        for future in futures {
            future.wait().unwrap();
        }
    });

    // No order is defined between the two paths, only within each
    let writes = wire.frames();
    assert_eq!(writes.len(), queued.len() + blocking.len());
    assert!(subsequence_positions(&writes, &queued).is_some());
    assert!(subsequence_positions(&writes, &blocking).is_some());
}
