//! Send reports
//!
//! Every finished send (confirmed or exhausted) can be reported to a hook. The
//! hook runs on its own thread so a slow subscriber never stalls the retry loop.

use chrono::{DateTime, Utc};
use std::io;
use std::sync::mpsc::{self, Sender};
use std::thread;
use tracing::debug;

use super::FrameKind;

/// Outcome of one send, as seen by the report hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Human readable description of the frame, e.g. `KeyboardPress(0x04)`
    pub description: String,
    /// Command kind
    pub kind: FrameKind,
    /// First confirmed send time, or the last attempted one on failure
    pub send_time: DateTime<Utc>,
    /// Attempts made (1-based)
    pub attempts: u32,
    /// Whether the device echoed the frame
    pub confirmed: bool,
}

/// Callback receiving send reports
pub type ReportHook = Box<dyn FnMut(&SendReport) + Send>;

/// Forwards reports to a hook running on a dedicated thread
pub struct Reporter {
    tx: Sender<SendReport>,
}

impl Reporter {
    /// Start the reporter thread.
    ///
    /// The thread exits once the reporter is dropped and the backlog is drained.
    pub fn spawn(mut hook: ReportHook) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<SendReport>();
        thread::Builder::new()
            .name("kmlink-report".into())
            .spawn(move || {
                for report in rx {
                    hook(&report);
                }
                debug!("report thread exiting");
            })?;
        Ok(Self { tx })
    }

    /// Queue a report without blocking
    pub fn notify(&self, report: SendReport) {
        // The thread only goes away with the hook; nothing left to report to
        let _ = self.tx.send(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_reports_arrive_in_order() {
        let (seen_tx, seen_rx) = mpsc::channel();
        let reporter = Reporter::spawn(Box::new(move |r: &SendReport| {
            let _ = seen_tx.send(r.attempts);
        }))
        .expect("spawn reporter");

        for attempts in 1..=3 {
            reporter.notify(SendReport {
                description: "KeyboardPress(0x04)".into(),
                kind: FrameKind::KeyboardPress,
                send_time: Utc::now(),
                attempts,
                confirmed: true,
            });
        }

        let got: Vec<u32> = (0..3)
            .map(|_| seen_rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(got, vec![1, 2, 3]);
    }
}
