//! Retry policies.
//!
//! Two distinct rules that must not be conflated:
//!
//! - checksum failures get a bounded number of re-downloads and are then
//!   abandoned (a transfer that never verifies will never verify);
//! - transient infrastructure failures (device timeouts, network errors)
//!   are retried forever, with the poll interval stretching when the
//!   device is idle.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// What to do about a file that downloaded with a bad checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumRetryDecision {
    /// Attempt another download; the save path clears the stale slot.
    Redownload,
    /// Retries exhausted: erase the device copy, keep the local file for
    /// manual inspection.
    GiveUp,
}

/// Bounded re-download policy for checksum failures.
///
/// Counts re-download attempts per device filename: with a budget of N,
/// exactly N re-downloads are attempted and the N+1-th decision gives up.
/// The counts live only in memory, so a process restart resets them. The
/// worst case is one extra round of retries, which stays bounded.
#[derive(Debug)]
pub struct ChecksumRetryPolicy {
    max_retries: u32,
    counts: Mutex<HashMap<String, u32>>,
}

impl ChecksumRetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether to re-download the given file, consuming one retry
    /// from its budget if so.
    pub fn decide(&self, filename: &str) -> ChecksumRetryDecision {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(filename.to_string()).or_insert(0);
        if *count < self.max_retries {
            *count += 1;
            ChecksumRetryDecision::Redownload
        } else {
            ChecksumRetryDecision::GiveUp
        }
    }

    /// Drop the counter for a file whose device copy was erased.
    pub fn clear(&self, filename: &str) {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(filename);
    }
}

/// How soon the next device poll should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDelay {
    /// Files were acted on, or the device call failed: retry soon.
    Short,
    /// The device reported no files: back off to avoid busy-polling.
    Long,
}

/// Maps [`PollDelay`] to concrete durations from config.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub short: Duration,
    pub long: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(5),
            long: Duration::from_secs(60),
        }
    }
}

impl PollSchedule {
    pub fn duration(&self, delay: PollDelay) -> Duration {
        match delay {
            PollDelay::Short => self.short,
            PollDelay::Long => self.long,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_max_redownloads_then_give_up() {
        let policy = ChecksumRetryPolicy::new(3);
        for attempt in 1..=3 {
            assert_eq!(
                policy.decide("0005E1A3.BT"),
                ChecksumRetryDecision::Redownload,
                "attempt {attempt} should still be within budget"
            );
        }
        assert_eq!(policy.decide("0005E1A3.BT"), ChecksumRetryDecision::GiveUp);
        // and it stays given up
        assert_eq!(policy.decide("0005E1A3.BT"), ChecksumRetryDecision::GiveUp);
    }

    #[test]
    fn zero_budget_gives_up_immediately() {
        let policy = ChecksumRetryPolicy::new(0);
        assert_eq!(policy.decide("0005E1A3.BT"), ChecksumRetryDecision::GiveUp);
    }

    #[test]
    fn counters_are_per_filename() {
        let policy = ChecksumRetryPolicy::new(1);
        assert_eq!(
            policy.decide("0005E1A3.BT"),
            ChecksumRetryDecision::Redownload
        );
        assert_eq!(
            policy.decide("0005E1A4.BT"),
            ChecksumRetryDecision::Redownload
        );
        assert_eq!(policy.decide("0005E1A3.BT"), ChecksumRetryDecision::GiveUp);
    }

    #[test]
    fn clear_restores_the_budget() {
        let policy = ChecksumRetryPolicy::new(1);
        policy.decide("0005E1A3.BT");
        assert_eq!(policy.decide("0005E1A3.BT"), ChecksumRetryDecision::GiveUp);

        policy.clear("0005E1A3.BT");
        assert_eq!(
            policy.decide("0005E1A3.BT"),
            ChecksumRetryDecision::Redownload
        );
    }

    #[test]
    fn schedule_maps_delays() {
        let schedule = PollSchedule {
            short: Duration::from_secs(2),
            long: Duration::from_secs(120),
        };
        assert_eq!(schedule.duration(PollDelay::Short), Duration::from_secs(2));
        assert_eq!(schedule.duration(PollDelay::Long), Duration::from_secs(120));
    }
}
