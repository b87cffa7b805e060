// =============================================================================
// detector.rs — THE BOUNCER DETECTOR
// =============================================================================
//
// The gazette site does not send a polite 403 when it decides you are a
// robot. It gaslights you: forms that eat input, buttons that play dead.
// This module is the part of the engine that stops taking it personally
// and names what is happening.
//
// Classification doctrine:
// - A blocking-signature fault (input rejected after forced write, or a
//   submit control that never wakes up) means BLOCKED, immediately. No
//   amount of retrying charms a bouncer.
// - Ordinary faults (timeouts, stale elements, disconnects) are
//   TRANSIENT — retryable within the per-date budget, and counted. Two
//   consecutive dates failing for ANY reason is circumstantial evidence
//   of the same bouncer, and we stop hammering a site that is telling us
//   no. That would be pointless, rude, and grounds for a real IP ban.
//
// The thresholds are deliberately tiny. This is a polite scraper with a
// synthetic fallback, not a siege engine.
// =============================================================================

use std::time::Duration;
use tracing::{info, warn};

use crate::session::SessionFault;

/// The verdict on one failed date attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outage {
    /// Ordinary flakiness. Retry within budget, count it, move on.
    Transient,
    /// The anti-automation signature. Stop querying, switch to synthetic
    /// output for the rest of the range.
    Blocked,
}

/// Classify a fault from one attempt against the page.
pub fn classify(fault: &SessionFault) -> Outage {
    if fault.is_blocking_signature() {
        Outage::Blocked
    } else {
        Outage::Transient
    }
}

/// The retry knobs for one run, as a value object so the orchestrator,
/// the config layer, and the tests all speak the same numbers.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per gazette date before giving up on that date.
    pub max_attempts_per_date: u32,
    /// Consecutive failed DATES before the whole run is declared blocked.
    pub consecutive_fault_threshold: u32,
    /// Pause before reloading the page for a retry attempt.
    pub reload_delay: Duration,
    /// Pause between successive dates, because we are guests here.
    pub per_date_throttle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts_per_date: 2,
            consecutive_fault_threshold: 2,
            reload_delay: Duration::from_secs(2),
            per_date_throttle: Duration::from_secs(1),
        }
    }
}

/// Tracks consecutive failed dates across a run. A success anywhere
/// resets the count — the bouncer theory requires an unbroken streak.
#[derive(Debug, Default)]
pub struct ConsecutiveFaultTracker {
    streak: u32,
}

impl ConsecutiveFaultTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a date that succeeded. Streak broken, suspicion withdrawn.
    pub fn record_success(&mut self) {
        if self.streak > 0 {
            info!(streak = self.streak, "fault streak broken by a successful date");
        }
        self.streak = 0;
    }

    /// Record a date that exhausted its attempts. Returns `true` when the
    /// streak has reached the threshold and the run should stop querying.
    pub fn record_failure(&mut self, policy: &RetryPolicy) -> bool {
        self.streak += 1;
        let tripped = self.streak >= policy.consecutive_fault_threshold;
        if tripped {
            warn!(
                streak = self.streak,
                threshold = policy.consecutive_fault_threshold,
                "consecutive-failure threshold reached — treating the site as blocked"
            );
        } else {
            warn!(
                streak = self.streak,
                threshold = policy.consecutive_fault_threshold,
                "date failed — {}/{} before declaring the site blocked",
                self.streak,
                policy.consecutive_fault_threshold
            );
        }
        tripped
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn any_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 17).unwrap()
    }

    #[test]
    fn test_blocking_signature_faults_classify_as_blocked() {
        assert_eq!(
            classify(&SessionFault::InputRejected { date: any_date() }),
            Outage::Blocked
        );
        assert_eq!(
            classify(&SessionFault::ControlUnready { date: any_date() }),
            Outage::Blocked
        );
    }

    #[test]
    fn test_ordinary_faults_classify_as_transient() {
        assert_eq!(
            classify(&SessionFault::Timeout("page load".to_string())),
            Outage::Transient
        );
        assert_eq!(
            classify(&SessionFault::StaleElement("dtDiario".to_string())),
            Outage::Transient
        );
        assert_eq!(
            classify(&SessionFault::Disconnected("socket closed".to_string())),
            Outage::Transient
        );
    }

    #[test]
    fn test_tracker_trips_at_threshold() {
        let policy = RetryPolicy::default();
        let mut tracker = ConsecutiveFaultTracker::new();
        assert!(!tracker.record_failure(&policy));
        assert!(tracker.record_failure(&policy)); // threshold is 2
    }

    #[test]
    fn test_success_resets_streak() {
        let policy = RetryPolicy::default();
        let mut tracker = ConsecutiveFaultTracker::new();
        tracker.record_failure(&policy);
        tracker.record_success();
        assert_eq!(tracker.streak(), 0);
        assert!(!tracker.record_failure(&policy)); // streak restarts at 1
    }
}
