//! Retry helpers applied at each remote call site.

use crate::cancel::CancellationToken;
use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// Granularity of the cancellable backoff sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Runs `op`, retrying network errors with exponential backoff.
///
/// Any other error is returned immediately. Cancellation is checked before
/// every attempt and during backoff sleeps.
pub fn with_network_retry<T, F>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> SyncResult<T>
where
    F: FnMut() -> SyncResult<T>,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            sleep_cancellable(config.delay_for_attempt(attempt), cancel)?;
        }
        cancel.check()?;

        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                attempt += 1;
                warn!(
                    "Network error during {}, retrying ({}/{}): {}",
                    what, attempt, config.max_attempts, e
                );
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs `op`, retrying undecodable payloads immediately up to `attempts`
/// times in total.
///
/// The last decode error is returned once the attempts are exhausted.
pub fn with_decode_retry<T, F>(attempts: u32, what: &str, mut op: F) -> SyncResult<T>
where
    F: FnMut() -> SyncResult<T>,
{
    let mut remaining = attempts.max(1);
    loop {
        remaining -= 1;
        match op() {
            Err(SyncError::PayloadDecode { message }) if remaining > 0 => {
                debug!(
                    "Remote returned bad data while fetching {}, retrying: {}",
                    what, message
                );
            }
            other => return other,
        }
    }
}

fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> SyncResult<()> {
    let deadline = Instant::now() + delay;
    loop {
        cancel.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_retry(attempts: u32) -> RetryConfig {
        RetryConfig::new(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_jitter(false)
    }

    #[test]
    fn network_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let result = with_network_retry(&fast_retry(5), &CancellationToken::new(), "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SyncError::network("reset"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn network_retry_gives_up_at_ceiling() {
        let calls = Cell::new(0);
        let result: SyncResult<()> =
            with_network_retry(&fast_retry(4), &CancellationToken::new(), "test", || {
                calls.set(calls.get() + 1);
                Err(SyncError::network("down"))
            });
        assert!(matches!(result, Err(SyncError::Network { .. })));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn non_network_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: SyncResult<()> =
            with_network_retry(&fast_retry(10), &CancellationToken::new(), "test", || {
                calls.set(calls.get() + 1);
                Err(SyncError::RateLimited { retry_after_secs: 60 })
            });
        assert!(matches!(result, Err(SyncError::RateLimited { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn cancelled_token_stops_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: SyncResult<()> = with_network_retry(&fast_retry(3), &cancel, "test", || -> SyncResult<()> {
            panic!("must not be called")
        });
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[test]
    fn decode_retry_is_bounded() {
        let calls = Cell::new(0);
        let result: SyncResult<()> = with_decode_retry(5, "note", || {
            calls.set(calls.get() + 1);
            Err(SyncError::decode("unpack"))
        });
        assert!(matches!(result, Err(SyncError::PayloadDecode { .. })));
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn decode_retry_recovers_from_glitch() {
        let calls = Cell::new(0);
        let result = with_decode_retry(5, "note", || {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Err(SyncError::decode("unpack"))
            } else {
                Ok("body")
            }
        });
        assert_eq!(result.unwrap(), "body");
        assert_eq!(calls.get(), 2);
    }
}
