use tracing::warn;

/// What to do with a report after it was rejected again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectDecision {
    /// Leave it in place and look at it on the next cycle.
    RetryNextCycle,
    /// Leave it in place but skip it until `not_before` (epoch seconds).
    Defer { attempt: u32, not_before: i64 },
    /// Stop retrying: move it out of the search directory.
    Quarantine { attempts: u32 },
}

/// Backoff and give-up policy for rejected reports.
///
/// Only used when the rejection ledger is enabled; without it every rejected
/// report is simply retried each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectPolicy {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// 0 never quarantines.
    pub max_attempts: u32,
}

impl RejectPolicy {
    /// Decide after the `attempts`-th rejection (1-based) at time `now`.
    pub fn evaluate(&self, attempts: u32, now: i64) -> RejectDecision {
        if self.max_attempts > 0 && attempts >= self.max_attempts {
            warn!(
                attempts,
                max_attempts = self.max_attempts,
                "rejection limit reached, quarantining"
            );
            return RejectDecision::Quarantine { attempts };
        }

        let delay = backoff_delay(
            self.initial_backoff_secs,
            attempts.saturating_sub(1),
            self.max_backoff_secs,
        );
        if delay == 0 {
            return RejectDecision::RetryNextCycle;
        }

        let delay = i64::try_from(delay).unwrap_or(i64::MAX);
        RejectDecision::Defer {
            attempt: attempts,
            not_before: now.saturating_add(delay),
        }
    }
}

/// Exponential backoff: `initial_delay * 2^consecutive_count`, capped at
/// `max_delay`.
pub fn backoff_delay(initial_delay_secs: u64, consecutive_count: u32, max_delay_secs: u64) -> u64 {
    let shift = 1u64.checked_shl(consecutive_count).unwrap_or(u64::MAX);
    let delay = initial_delay_secs.saturating_mul(shift);
    delay.min(max_delay_secs)
}
