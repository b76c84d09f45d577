use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    data_model::{TransferError, TransferErrorKind},
    providers::ProviderError,
};

fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_quota_backoff_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_quota_backoff_ms")]
    pub quota_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            quota_backoff_ms: default_quota_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, or None when the error is permanent
    /// or the attempt budget is spent. `attempts` counts attempts already
    /// made, the failed one included. TRANSIENT errors back off
    /// exponentially with jitter; QUOTA_EXCEEDED gets exactly one retry
    /// after a long flat delay; everything else is permanent.
    pub fn next_delay(&self, error: &TransferError, attempts: u32) -> Option<Duration> {
        match error.kind {
            TransferErrorKind::Transient
            | TransferErrorKind::DeadlineExceeded
            | TransferErrorKind::VerificationMismatch => {
                if attempts < self.max_attempts {
                    Some(self.backoff(attempts))
                } else {
                    None
                }
            }
            TransferErrorKind::QuotaExceeded => {
                if attempts < 2 {
                    Some(Duration::from_millis(self.quota_backoff_ms))
                } else {
                    None
                }
            }
            TransferErrorKind::PermissionDenied
            | TransferErrorKind::NotFound
            | TransferErrorKind::InvalidArgument
            | TransferErrorKind::Unavailable
            | TransferErrorKind::Conflict
            | TransferErrorKind::Cancelled => None,
        }
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let exp = self
            .base_backoff_ms
            .saturating_mul(1u64 << (attempts.saturating_sub(1)).min(16));
        let capped = exp.min(self.max_backoff_ms);
        let jitter = rand::thread_rng().gen_range(0..=capped / 2);
        Duration::from_millis(capped + jitter)
    }
}

/// Classification of an adapter failure at the engine boundary, carried on
/// the FileTransfer as its structured last_error.
pub fn classify_provider_error(error: &ProviderError) -> TransferError {
    let kind = match error {
        ProviderError::PermissionDenied(_) => TransferErrorKind::PermissionDenied,
        ProviderError::NotFound(_) => TransferErrorKind::NotFound,
        ProviderError::QuotaExceeded(_) => TransferErrorKind::QuotaExceeded,
        ProviderError::Transient(_) => TransferErrorKind::Transient,
        ProviderError::InvalidArgument(_) => TransferErrorKind::InvalidArgument,
        ProviderError::Unavailable(_) => TransferErrorKind::Unavailable,
        ProviderError::DestExistsConflict(_) => TransferErrorKind::Conflict,
    };
    TransferError {
        kind,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(kind: TransferErrorKind) -> TransferError {
        TransferError {
            kind,
            message: "test".to_string(),
        }
    }

    #[test]
    fn test_transient_retries_until_budget() {
        let policy = RetryPolicy::default();
        let err = error(TransferErrorKind::Transient);
        assert!(policy.next_delay(&err, 1).is_some());
        assert!(policy.next_delay(&err, 2).is_some());
        assert!(policy.next_delay(&err, 3).is_none());
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let policy = RetryPolicy::default();
        for kind in [
            TransferErrorKind::NotFound,
            TransferErrorKind::PermissionDenied,
            TransferErrorKind::InvalidArgument,
            TransferErrorKind::Cancelled,
        ] {
            assert!(policy.next_delay(&error(kind), 1).is_none());
        }
    }

    #[test]
    fn test_quota_gets_exactly_one_long_retry() {
        let policy = RetryPolicy::default();
        let err = error(TransferErrorKind::QuotaExceeded);
        let delay = policy.next_delay(&err, 1).unwrap();
        assert_eq!(delay, Duration::from_millis(policy.quota_backoff_ms));
        assert!(policy.next_delay(&err, 2).is_none());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
            quota_backoff_ms: 60_000,
        };
        let err = error(TransferErrorKind::Transient);
        let first = policy.next_delay(&err, 1).unwrap();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        // Attempt 9: exponent far past the cap.
        let late = policy.next_delay(&err, 9).unwrap();
        assert!(late <= Duration::from_millis(1_500));
    }
}
