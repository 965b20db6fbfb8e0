//! Lockout policy: pure decisions over the failed-attempt counter.
//!
//! The caller loads the user row under a lock, asks these functions what the
//! next state is, and persists it in the same transaction as the password
//! comparison. Two concurrent failures therefore cannot both observe attempt
//! four and skip the lock.

use chrono::{DateTime, Duration, Utc};

pub(crate) const MAX_FAILED_ATTEMPTS: i32 = 5;
pub(crate) const LOCK_DURATION_MINUTES: i64 = 30;

/// Next lockout state after a failed password comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FailureDecision {
    pub(crate) failed_attempts: i32,
    pub(crate) locked_until: Option<DateTime<Utc>>,
}

/// Register one more failure on top of `previous_attempts`.
pub(crate) fn register_failure(previous_attempts: i32, now: DateTime<Utc>) -> FailureDecision {
    let failed_attempts = previous_attempts.saturating_add(1);
    let locked_until = if failed_attempts >= MAX_FAILED_ATTEMPTS {
        Some(now + Duration::minutes(LOCK_DURATION_MINUTES))
    } else {
        None
    };
    FailureDecision {
        failed_attempts,
        locked_until,
    }
}

/// Whether a stored lock is still in force.
pub(crate) fn is_locked(locked_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    locked_until.is_some_and(|until| until > now)
}

/// Whether a stored lock exists but has expired and should be cleared.
pub(crate) fn lock_expired(locked_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    locked_until.is_some_and(|until| until <= now)
}
