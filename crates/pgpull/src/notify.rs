//! End-of-run notifications
//!
//! Long-running query batches finish while the analyst is looking elsewhere;
//! the notifier rings the terminal bell and logs the elapsed time. Emitting
//! a notification never fails the surrounding operation.

use std::io::Write;
use std::time::Duration;

use tracing::info;

/// Notification helper for completed fetches and batch runs
#[derive(Debug, Clone)]
pub struct Notifier {
    bell: bool,
}

impl Default for Notifier {
    fn default() -> Self {
        Self { bell: true }
    }
}

impl Notifier {
    /// Create a notifier; `bell` controls the audible channel
    pub fn new(bell: bool) -> Self {
        Self { bell }
    }

    /// A notifier that only logs
    pub fn silent() -> Self {
        Self { bell: false }
    }

    /// Announce completion of the named operation
    pub fn completed(&self, label: &str, elapsed: Duration) {
        info!(label, elapsed = %format_elapsed(elapsed), "completed");
        if self.bell {
            // ASCII BEL; ignored by terminals without a bell.
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(b"\x07");
            let _ = stderr.flush();
        }
    }
}

/// Render a duration as `h:mm:ss`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, rest) = (total / 3600, total % 3600);
    format!("{}:{:02}:{:02}", hours, rest / 60, rest % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(83)), "0:01:23");
        assert_eq!(format_elapsed(Duration::from_secs(3600)), "1:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(7325)), "2:02:05");
    }

    #[test]
    fn test_silent_notifier_does_not_panic() {
        Notifier::silent().completed("test", Duration::from_millis(10));
    }
}
