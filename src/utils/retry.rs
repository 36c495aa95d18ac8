//! Retry utilities: backoff builders.
//!
//! Uses `backon` for exponential backoff with jitter. Only operations that
//! are idempotent by construction are retried automatically; ingestion is,
//! redemption is not.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for ingestion sub-batches that hit a contention timeout.
///
/// - Min delay: 50ms
/// - Max delay: 2s
/// - Max attempts: `max_retries`
/// - Jitter enabled
pub fn ingestion_backoff(max_retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(max_retries)
        .with_jitter()
}

/// Backoff for reaching the database at process startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use backon::Retryable;

    use crate::error::LedgerError;

    #[tokio::test(start_paused = true)]
    async fn test_ingestion_backoff_retries_contention_only() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), LedgerError> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::ContentionTimeout("busy".to_string()))
        })
        .retry(ingestion_backoff(3))
        .when(|e: &LedgerError| e.is_retryable())
        .await;

        assert!(matches!(result, Err(LedgerError::ContentionTimeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_business_errors_are_not_retried() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), LedgerError> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::DuplicateRequest {
                fingerprint: "ab".to_string(),
            })
        })
        .retry(ingestion_backoff(3))
        .when(|e: &LedgerError| e.is_retryable())
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
