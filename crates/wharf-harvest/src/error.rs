//! Fetch error taxonomy and retry policy
//!
//! Every remote failure is classified once, at the point it is observed, and
//! the retry loop only consults the classification. Retries use capped
//! linear backoff (`base_delay * attempt`).

use std::time::Duration;
use thiserror::Error;

/// Classified failure of a single fetch attempt.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Timeouts, connection resets, 5xx responses and rate limiting;
    /// expected to go away on its own.
    #[error("transient: {0}")]
    Transient(String),

    /// The target is genuinely absent or the request is malformed; retrying
    /// cannot help.
    #[error("fatal: HTTP {status} for {url}")]
    Fatal { status: u16, url: String },

    /// A range transfer delivered the wrong number of bytes. Truncation is
    /// indistinguishable from a transient network fault, so it retries.
    #[error("integrity: expected {expected} bytes, got {actual}")]
    Integrity { expected: u64, actual: u64 },

    /// Local write failure; disk problems do not self-heal, so the task
    /// fails without retry.
    #[error("persistence: {0}")]
    Persistence(#[from] std::io::Error),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::Integrity { .. })
    }

    /// Short class label for failure logs.
    pub fn class(&self) -> &'static str {
        match self {
            FetchError::Transient(_) => "transient",
            FetchError::Fatal { .. } => "fatal",
            FetchError::Integrity { .. } => "integrity",
            FetchError::Persistence(_) => "persistence",
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Bounded linear backoff: attempt `n` waits `base_delay * n`, capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Decide whether attempt `attempt` (1-based) should be followed by
    /// another.
    pub fn decide(&self, attempt: u32, error: &FetchError) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let delay = self
            .base_delay
            .saturating_mul(attempt)
            .min(self.max_delay);
        RetryDecision::Retry(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_secs(3), Duration::from_secs(60))
    }

    #[test]
    fn test_transient_retries_with_linear_backoff() {
        let err = FetchError::Transient("connection reset".into());
        assert_eq!(
            policy().decide(1, &err),
            RetryDecision::Retry(Duration::from_secs(3))
        );
        assert_eq!(
            policy().decide(4, &err),
            RetryDecision::Retry(Duration::from_secs(12))
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = RetryPolicy::new(100, Duration::from_secs(30), Duration::from_secs(60));
        let err = FetchError::Transient("timeout".into());
        assert_eq!(
            p.decide(10, &err),
            RetryDecision::Retry(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_fatal_never_retries() {
        let err = FetchError::Fatal {
            status: 404,
            url: "https://example.com".into(),
        };
        assert_eq!(policy().decide(1, &err), RetryDecision::GiveUp);
    }

    #[test]
    fn test_integrity_retries() {
        let err = FetchError::Integrity {
            expected: 100,
            actual: 90,
        };
        assert!(matches!(
            policy().decide(1, &err),
            RetryDecision::Retry(_)
        ));
    }

    #[test]
    fn test_persistence_never_retries() {
        let err = FetchError::Persistence(std::io::Error::other("disk full"));
        assert_eq!(policy().decide(1, &err), RetryDecision::GiveUp);
    }

    #[test]
    fn test_budget_exhaustion() {
        let err = FetchError::Transient("timeout".into());
        assert_eq!(policy().decide(5, &err), RetryDecision::GiveUp);
    }
}
