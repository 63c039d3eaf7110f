//! Retry with exponential backoff for session setup

use std::time::Duration;

use crate::http::FetchError;

/// Exponential backoff: `base * 2^attempt` (2s, 4s, 8s, ... for a 1s base)
pub fn backoff_duration(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Retry a fallible upstream operation with exponential backoff.
///
/// On retryable errors, logs the failure, sleeps, and retries up to
/// `max_retries` times. Returns `Ok(T)` on first success, or the final `Err`
/// on exhaustion / non-retryable error.
pub fn retry_with_backoff<T>(
    label: &str,
    max_retries: u32,
    base: Duration,
    mut attempt_fn: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                attempt += 1;
                log::warn!("{label}: attempt {attempt}/{max_retries} failed: {e}, retrying...");
                std::thread::sleep(backoff_duration(base, attempt));
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_exponential() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_duration(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_duration(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_duration(base, 3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_saturates() {
        let d = backoff_duration(Duration::from_secs(1), 64);
        assert!(d >= Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let out = retry_with_backoff("t", 3, Duration::ZERO, || {
            calls += 1;
            if calls < 3 {
                Err(FetchError::Http {
                    status: Some(503),
                    message: "busy".into(),
                })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_budget() {
        let mut calls = 0;
        let out: Result<(), _> = retry_with_backoff("t", 2, Duration::ZERO, || {
            calls += 1;
            Err(FetchError::Http {
                status: None,
                message: "reset".into(),
            })
        });
        assert!(out.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn non_retryable_fails_fast() {
        let mut calls = 0;
        let out: Result<(), _> = retry_with_backoff("t", 5, Duration::ZERO, || {
            calls += 1;
            Err(FetchError::protocol("no hidden fields"))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }
}
