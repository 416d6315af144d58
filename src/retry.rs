use std::time::Duration;

/// How a failed delivery attempt is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying: 5xx responses, network errors, timeouts.
    Transient,
    /// Never retried: the partner understood the request and rejected it.
    Permanent,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after the given delay.
    RetryAfter(Duration),
    /// Give up; the lead becomes permanently failed.
    Terminal,
}

/// Classifies a partner HTTP status for retry purposes. Any 4xx is
/// permanent, including 429: the partner answered, retrying the same
/// payload will not change its mind. Statuses outside the expected
/// ranges are treated as permanent as well.
pub fn classify_status(status: u16) -> FailureKind {
    if (500..600).contains(&status) {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

/// Retry schedule for transient delivery failures.
///
/// Pure over its inputs so the schedule can be tested without a clock:
/// given the attempt number just completed and the failure kind, returns
/// either a delay or the decision to stop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base: Duration,
    ceiling: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, ceiling: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            ceiling,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `attempt_number` is 1-based and counts the attempt that just failed.
    pub fn decide(&self, attempt_number: u32, kind: FailureKind) -> RetryDecision {
        if kind == FailureKind::Permanent || attempt_number >= self.max_attempts {
            return RetryDecision::Terminal;
        }
        RetryDecision::RetryAfter(self.delay_for(attempt_number))
    }

    /// Exponential backoff capped at the ceiling: base * 2^(n-1).
    fn delay_for(&self, attempt_number: u32) -> Duration {
        let shift = attempt_number.saturating_sub(1).min(32);
        let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay = self
            .base
            .as_millis()
            .saturating_mul(u128::from(factor))
            .min(self.ceiling.as_millis());
        Duration::from_millis(delay as u64)
    }
}
