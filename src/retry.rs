//! Retry policy: an immutable value describing how one stage (or the
//! extraction adapter) responds to failure.
//!
//! ## Backoff
//!
//! The delay before retry *n* (1-based) is
//! `min(initial_backoff × multiplier^(n-1), max_backoff)`. With the extract
//! stage defaults (2 s, ×2, cap 30 s) the sequence is 2 s → 4 s → 8 s …
//! Exponential backoff keeps N concurrent pipelines from hammering a
//! recovering provider in lockstep.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Immutable per-stage retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` means "never retry".
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    /// Kinds that are never retried, regardless of remaining attempts.
    pub non_retryable: BTreeSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            non_retryable: BTreeSet::new(),
        }
    }
}

impl RetryPolicy {
    /// A policy with `max_attempts` attempts and default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.multiplier = multiplier;
        self.max_backoff = max;
        self
    }

    pub fn with_non_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.non_retryable.extend(kinds);
        self
    }

    pub fn without_non_retryable(mut self, kind: ErrorKind) -> Self {
        self.non_retryable.remove(&kind);
        self
    }

    /// Whether `kind` may ever be retried under this policy.
    pub fn allows_retry(&self, kind: ErrorKind) -> bool {
        self.max_attempts > 1 && !self.non_retryable.contains(&kind)
    }

    /// Whether a failure of `kind` on attempt `attempt` (1-based) earns
    /// another attempt.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        attempt < self.max_attempts && !self.non_retryable.contains(&kind)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exp);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_backoff
        }
    }

    /// Check the policy's internal consistency.
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err(format!("{name}: max_attempts must be ≥ 1"));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(format!(
                "{name}: backoff multiplier must be ≥ 1.0, got {}",
                self.multiplier
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(format!(
                "{name}: max_backoff ({:?}) is below initial_backoff ({:?})",
                self.max_backoff, self.initial_backoff
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let p = RetryPolicy::new(6).with_backoff(
            Duration::from_secs(2),
            2.0,
            Duration::from_secs(10),
        );
        assert_eq!(p.backoff_for(1), Duration::from_secs(2));
        assert_eq!(p.backoff_for(2), Duration::from_secs(4));
        assert_eq!(p.backoff_for(3), Duration::from_secs(8));
        assert_eq!(p.backoff_for(4), Duration::from_secs(10));
        assert_eq!(p.backoff_for(40), Duration::from_secs(10));
    }

    #[test]
    fn should_retry_respects_budget_and_kinds() {
        let p = RetryPolicy::new(3).with_non_retryable([ErrorKind::Validation]);
        assert!(p.should_retry(ErrorKind::Storage, 1));
        assert!(p.should_retry(ErrorKind::Storage, 2));
        assert!(!p.should_retry(ErrorKind::Storage, 3));
        assert!(!p.should_retry(ErrorKind::Validation, 1));
    }

    #[test]
    fn allows_retry_is_false_for_single_attempt() {
        assert!(!RetryPolicy::no_retry().allows_retry(ErrorKind::Storage));
        assert!(RetryPolicy::new(2).allows_retry(ErrorKind::Storage));
    }

    #[test]
    fn removing_a_kind_reenables_retry() {
        let p = RetryPolicy::new(2)
            .with_non_retryable([ErrorKind::Parse, ErrorKind::Validation])
            .without_non_retryable(ErrorKind::Parse);
        assert!(p.allows_retry(ErrorKind::Parse));
        assert!(!p.allows_retry(ErrorKind::Validation));
    }

    #[test]
    fn validate_rejects_inconsistent_policies() {
        let bad = RetryPolicy::new(3).with_backoff(
            Duration::from_secs(5),
            0.5,
            Duration::from_secs(10),
        );
        assert!(bad.validate("extract").is_err());

        let bad = RetryPolicy::new(3).with_backoff(
            Duration::from_secs(5),
            2.0,
            Duration::from_secs(1),
        );
        assert!(bad.validate("extract").is_err());

        assert!(RetryPolicy::default().validate("default").is_ok());
    }
}
