//! Google Drive adapter settings

use std::time::Duration;

/// Attempts per request, including the first one
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Timeout for metadata requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for media uploads and downloads
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// First retry delay; doubles on every further attempt
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Settings for [`GoogleDriveStorage`](crate::GoogleDriveStorage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveConfig {
    /// Drive folder that mirrors the local vault root
    pub root_folder_id: String,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub transfer_timeout: Duration,
    pub retry_base_delay: Duration,
}

impl DriveConfig {
    pub fn new(root_folder_id: impl Into<String>) -> Self {
        Self {
            root_folder_id: root_folder_id.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }

    /// Zero is treated as one attempt.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriveConfig::new("root");
        assert_eq!(config.root_folder_id, "root");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_doubles() {
        let config = DriveConfig::new("root");
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(DriveConfig::new("r").with_max_attempts(0).max_attempts, 1);
    }
}
