use crate::core::capabilities::{AccessibilityAnnouncer, AnnouncementPriority};
use crate::core::orchestrator::CaptureHandle;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Writes announcements to stderr so stdout stays machine readable.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleAnnouncer;

impl AccessibilityAnnouncer for ConsoleAnnouncer {
    fn announce(&self, text: &str, priority: AnnouncementPriority) {
        let mut stderr = std::io::stderr().lock();
        let _ = match priority {
            AnnouncementPriority::Polite => writeln!(stderr, "  {}", text),
            AnnouncementPriority::Assertive => writeln!(stderr, "! {}", text),
        };
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints a progress line whenever the session progress moves. Abort the
/// returned task once the capture is over.
pub fn spawn_progress_reporter(handle: CaptureHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        let mut last = -1.0f32;
        loop {
            ticker.tick().await;
            let progress = handle.progress();
            if (progress - last).abs() > f32::EPSILON {
                eprintln!("[{:>5.1}%] capturing", progress);
                last = progress;
            }
        }
    })
}
