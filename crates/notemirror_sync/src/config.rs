//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Largest chunk size the remote accepts.
pub const MAX_CHUNK_ENTRIES_CEILING: u32 = 250;

/// Largest download pool width accepted.
pub const MAX_DOWNLOAD_WORKERS: usize = 20;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum entries requested per metadata chunk.
    pub max_chunk_entries: u32,
    /// Number of content download workers.
    pub download_workers: usize,
    /// Download memory budget in megabytes.
    pub memory_limit_mb: u64,
    /// Network retry configuration.
    pub retry: RetryConfig,
    /// Immediate retries of a note fetch that returned an undecodable payload.
    pub decode_retry_attempts: u32,
    /// How long an aborting download phase waits for in-flight work.
    pub drain_grace: Duration,
    /// How often the download coordinator checks for external cancellation.
    pub poll_interval: Duration,
    /// Whether to sync the task and reminder stream.
    pub include_tasks: bool,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_chunk_entries: 200,
            download_workers: 5,
            memory_limit_mb: 256,
            retry: RetryConfig::default(),
            decode_retry_attempts: 5,
            drain_grace: Duration::from_secs(30),
            poll_interval: Duration::from_millis(200),
            include_tasks: false,
        }
    }

    /// Sets the maximum entries per metadata chunk.
    pub fn with_max_chunk_entries(mut self, entries: u32) -> Self {
        self.max_chunk_entries = entries;
        self
    }

    /// Sets the download pool width.
    pub fn with_download_workers(mut self, workers: usize) -> Self {
        self.download_workers = workers;
        self
    }

    /// Sets the download memory budget in megabytes.
    pub fn with_memory_limit_mb(mut self, megabytes: u64) -> Self {
        self.memory_limit_mb = megabytes;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the number of immediate retries on undecodable payloads.
    pub fn with_decode_retry_attempts(mut self, attempts: u32) -> Self {
        self.decode_retry_attempts = attempts;
        self
    }

    /// Sets the abort drain grace period.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Sets the coordinator poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enables or disables the task stream.
    pub fn with_include_tasks(mut self, include: bool) -> Self {
        self.include_tasks = include;
        self
    }

    /// Returns the memory budget in bytes.
    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_chunk_entries == 0 || self.max_chunk_entries > MAX_CHUNK_ENTRIES_CEILING {
            return Err(SyncError::Config(format!(
                "max chunk entries must be between 1 and {}, got {}",
                MAX_CHUNK_ENTRIES_CEILING, self.max_chunk_entries
            )));
        }
        if self.download_workers == 0 || self.download_workers > MAX_DOWNLOAD_WORKERS {
            return Err(SyncError::Config(format!(
                "download workers must be between 1 and {}, got {}",
                MAX_DOWNLOAD_WORKERS, self.download_workers
            )));
        }
        if self.memory_limit_mb == 0 {
            return Err(SyncError::Config("memory limit must be at least 1 MB".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config(
                "network retry attempts must be at least 1".into(),
            ));
        }
        if self.decode_retry_attempts == 0 {
            return Err(SyncError::Config(
                "decode retry attempts must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SyncError::Config("poll interval must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Add up to 25% jitter
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(50)
    }
}

// Sub-second clock noise; good enough to spread out concurrent retries.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        assert_eq!(config.max_chunk_entries, 200);
        assert_eq!(config.download_workers, 5);
        assert_eq!(config.memory_limit_bytes(), 256 * 1024 * 1024);
        assert_eq!(config.retry.max_attempts, 50);
        assert!(!config.include_tasks);
        config.validate().unwrap();
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_max_chunk_entries(50)
            .with_download_workers(2)
            .with_memory_limit_mb(8)
            .with_include_tasks(true)
            .with_drain_grace(Duration::from_secs(1));

        assert_eq!(config.max_chunk_entries, 50);
        assert_eq!(config.download_workers, 2);
        assert_eq!(config.memory_limit_mb, 8);
        assert!(config.include_tasks);
        assert_eq!(config.drain_grace, Duration::from_secs(1));
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let cases = [
            SyncConfig::new().with_max_chunk_entries(0),
            SyncConfig::new().with_max_chunk_entries(MAX_CHUNK_ENTRIES_CEILING + 1),
            SyncConfig::new().with_download_workers(0),
            SyncConfig::new().with_download_workers(MAX_DOWNLOAD_WORKERS + 1),
            SyncConfig::new().with_memory_limit_mb(0),
            SyncConfig::new().with_retry(RetryConfig::new(0)),
            SyncConfig::new().with_decode_retry_attempts(0),
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(SyncError::Config(_))));
        }
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
