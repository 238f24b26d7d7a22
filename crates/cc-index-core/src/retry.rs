//! Retry with exponential backoff for phase operations

use std::time::Duration;

use indicatif::ProgressBar;

use crate::error::PipelineError;

/// Exponential backoff: 2^attempt seconds (2s, 4s, 8s, ...)
pub const fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt))
}

/// Retry a fallible phase operation with exponential backoff.
///
/// On retryable errors, logs the failure, updates the progress bar, sleeps,
/// and retries up to `max_retries`. Non-retryable errors (see
/// [`PipelineError::is_retryable`]) return immediately on first occurrence.
///
/// Returns `Ok(T)` on first success, or the final `Err` on exhaustion / non-retryable error.
pub fn retry_with_backoff<T>(
    shard_label: &str,
    max_retries: u32,
    pb: &ProgressBar,
    mut attempt_fn: impl FnMut() -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                attempt += 1;
                pb.set_message(format!("retry {attempt}/{max_retries}..."));
                log::debug!(
                    "{shard_label}: attempt {attempt}/{max_retries} failed: {e}, retrying..."
                );
                std::thread::sleep(backoff_duration(attempt));
            }
            Err(e) => {
                log::error!("{shard_label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn backoff_exponential() {
        assert_eq!(backoff_duration(1), Duration::from_secs(2));
        assert_eq!(backoff_duration(2), Duration::from_secs(4));
        assert_eq!(backoff_duration(3), Duration::from_secs(8));
    }

    #[test]
    fn retries_retryable_error_until_success() {
        let pb = ProgressBar::hidden();
        let calls = RefCell::new(0u32);
        let result = retry_with_backoff("cdx-00001.gz", 2, &pb, || {
            *calls.borrow_mut() += 1;
            if *calls.borrow() < 2 {
                Err(PipelineError::BackpressureDisk {
                    collection: "CC-MAIN-2024-33".into(),
                })
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn gives_up_on_non_retryable_error_immediately() {
        let pb = ProgressBar::hidden();
        let calls = RefCell::new(0u32);
        let result: Result<(), PipelineError> = retry_with_backoff("cdx-00001.gz", 5, &pb, || {
            *calls.borrow_mut() += 1;
            Err(PipelineError::UnrecoverableMissing {
                collection: "CC-MAIN-2024-33".into(),
                shard: "cdx-00001.gz".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(*calls.borrow(), 1);
    }
}
