//! Write-completion heuristic for candidate files.
//!
//! A file is considered finished when two size readings taken
//! [`STABILITY_INTERVAL`] apart agree. This is not a lock: a producer that
//! stalls for exactly the interval mid-write will be misread as done.

use crate::clock::Clock;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Minimum spacing between the two size readings.
pub const STABILITY_INTERVAL: Duration = Duration::from_millis(500);

/// Result of probing one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityProbe {
    /// Both readings agreed.
    Stable { size: u64 },
    /// Size changed between readings; try again next poll.
    Growing { before: u64, after: u64 },
    /// The file could not be read on one of the readings (deleted or moved
    /// out of band). Not an error.
    Vanished,
}

impl StabilityProbe {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilityProbe::Stable { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StableFileDetector {
    interval: Duration,
}

impl Default for StableFileDetector {
    fn default() -> Self {
        Self {
            interval: STABILITY_INTERVAL,
        }
    }
}

impl StableFileDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a longer spacing between readings. Values below
    /// [`STABILITY_INTERVAL`] are raised to it.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval: interval.max(STABILITY_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Read the size, wait, read again.
    pub fn probe(&self, path: &Path, clock: &dyn Clock) -> StabilityProbe {
        let Some(before) = file_size(path) else {
            return StabilityProbe::Vanished;
        };
        clock.sleep(self.interval);
        let Some(after) = file_size(path) else {
            return StabilityProbe::Vanished;
        };

        if before == after {
            StabilityProbe::Stable { size: after }
        } else {
            StabilityProbe::Growing { before, after }
        }
    }
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|meta| meta.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Local;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_unchanged_file_is_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.ipa");
        fs::write(&path, b"payload").unwrap();
        let clock = ManualClock::new(Local::now());

        let probe = StableFileDetector::new().probe(&path, &clock);

        assert_eq!(probe, StabilityProbe::Stable { size: 7 });
        assert_eq!(clock.sleeps(), vec![STABILITY_INTERVAL]);
    }

    #[test]
    fn test_file_growing_during_wait_is_not_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.ipa");
        fs::write(&path, b"part").unwrap();
        let clock = ManualClock::new(Local::now());
        let writer_path = path.clone();
        clock.on_sleep(move |_| {
            let mut file = fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
            file.write_all(b"-more").unwrap();
        });

        let probe = StableFileDetector::new().probe(&path, &clock);

        assert_eq!(probe, StabilityProbe::Growing { before: 4, after: 9 });
        assert!(!probe.is_stable());
    }

    #[test]
    fn test_file_removed_during_wait_is_vanished() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.ipa");
        fs::write(&path, b"payload").unwrap();
        let clock = ManualClock::new(Local::now());
        let doomed = path.clone();
        clock.on_sleep(move |_| {
            let _ = fs::remove_file(&doomed);
        });

        assert_eq!(
            StableFileDetector::new().probe(&path, &clock),
            StabilityProbe::Vanished
        );
    }

    #[test]
    fn test_missing_file_skips_the_wait() {
        let temp = TempDir::new().unwrap();
        let clock = ManualClock::new(Local::now());

        let probe = StableFileDetector::new().probe(&temp.path().join("gone.ipa"), &clock);

        assert_eq!(probe, StabilityProbe::Vanished);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_interval_has_a_floor() {
        let detector = StableFileDetector::with_interval(Duration::from_millis(10));
        assert_eq!(detector.interval(), STABILITY_INTERVAL);

        let detector = StableFileDetector::with_interval(Duration::from_secs(2));
        assert_eq!(detector.interval(), Duration::from_secs(2));
    }
}
