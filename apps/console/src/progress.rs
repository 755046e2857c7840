//! # Sync Progress
//!
//! Bridges orchestrator callbacks onto a channel so the foreground can render
//! progress while the pass runs on a background task.
//!
//! ```text
//! ┌──────────────────────────┐   ProgressEvent   ┌──────────────────────────┐
//! │ background task          │ ────────────────► │ foreground               │
//! │ SyncOrchestrator         │   (unbounded mpsc)│ render one line per      │
//! │   └─ ChannelEmitter      │                   │ device, then the outcome │
//! └──────────────────────────┘                   └──────────────────────────┘
//! ```

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use attendo_core::{Device, DeviceSyncReport, SyncReport};
use attendo_sync::SyncEventEmitter;

/// One progress notification.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    DeviceStarted {
        name: String,
        address: String,
        position: usize,
        total: usize,
    },
    DeviceFinished(DeviceSyncReport),
    PassFinished(SyncReport),
}

/// Forwards orchestrator events to a channel.
///
/// Sends never block; a dropped receiver only means nobody is watching.
pub struct ChannelEmitter {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelEmitter {
    /// Creates an emitter and the receiving end of its channel.
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = unbounded_channel();
        (ChannelEmitter { tx }, rx)
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            trace!("Progress receiver dropped");
        }
    }
}

impl SyncEventEmitter for ChannelEmitter {
    fn device_started(&self, device: &Device, position: usize, total: usize) {
        self.send(ProgressEvent::DeviceStarted {
            name: device.name.clone(),
            address: device.address(),
            position,
            total,
        });
    }

    fn device_finished(&self, report: &DeviceSyncReport) {
        self.send(ProgressEvent::DeviceFinished(report.clone()));
    }

    fn pass_finished(&self, report: &SyncReport) {
        self.send(ProgressEvent::PassFinished(report.clone()));
    }
}

/// Renders a progress event as a single line.
pub fn render(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::DeviceStarted {
            name,
            address,
            position,
            total,
        } => format!("[{}/{}] {} ({}) ...", position, total, name, address),
        ProgressEvent::DeviceFinished(report) if !report.connected => format!(
            "      {}: unreachable ({})",
            report.device_name,
            report.errors.join("; ")
        ),
        ProgressEvent::DeviceFinished(report) => {
            let mut line = format!(
                "      {}: {} users, {} new punches ({} already stored)",
                report.device_name,
                report.users_processed,
                report.attendance_inserted,
                report.attendance_duplicates
            );
            let skipped = report.users_skipped + report.attendance_skipped;
            if skipped > 0 {
                line.push_str(&format!(", {} skipped", skipped));
            }
            if !report.errors.is_empty() {
                line.push_str(&format!(" [{}]", report.errors.join("; ")));
            }
            line
        }
        ProgressEvent::PassFinished(report) => format!(
            "Pass {}: {} connected, {} failed",
            report.pass_id,
            report.connected_count(),
            report.failed_count()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendo_core::SyncOutcome;

    fn report(connected: bool) -> DeviceSyncReport {
        DeviceSyncReport {
            device_id: 1,
            device_name: "Front door".into(),
            address: "10.0.0.5:4370".into(),
            connected,
            users_processed: 3,
            attendance_inserted: 5,
            attendance_duplicates: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (emitter, mut rx) = ChannelEmitter::channel();

        emitter.device_finished(&report(true));
        emitter.pass_finished(&SyncReport {
            pass_id: "p1".into(),
            outcome: SyncOutcome::Failure,
            devices: vec![report(true)],
        });
        drop(emitter);

        assert!(matches!(rx.recv().await, Some(ProgressEvent::DeviceFinished(_))));
        assert!(matches!(rx.recv().await, Some(ProgressEvent::PassFinished(_))));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (emitter, rx) = ChannelEmitter::channel();
        drop(rx);
        emitter.device_finished(&report(false));
    }

    #[test]
    fn test_render_lines() {
        let started = ProgressEvent::DeviceStarted {
            name: "Front door".into(),
            address: "10.0.0.5:4370".into(),
            position: 1,
            total: 3,
        };
        assert_eq!(render(&started), "[1/3] Front door (10.0.0.5:4370) ...");

        let done = render(&ProgressEvent::DeviceFinished(report(true)));
        assert_eq!(
            done,
            "      Front door: 3 users, 5 new punches (2 already stored)"
        );

        let mut down = report(false);
        down.errors.push("connection refused".into());
        assert_eq!(
            render(&ProgressEvent::DeviceFinished(down)),
            "      Front door: unreachable (connection refused)"
        );
    }
}
