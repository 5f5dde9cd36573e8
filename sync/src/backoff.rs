use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Every pause the sync makes goes through here so tests can swap in a
/// clock that only records what it was asked to do.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry schedule for source API requests.
///
/// Attempts are numbered from 1. Every attempt is preceded by a pause of
/// `attempt` seconds, which paces normal paging and backs off on retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.max(1)
    }

    /// Only gateway-ish server errors are retried, and never on the last attempt.
    pub fn should_retry(&self, status: StatusCode, attempt: u32) -> bool {
        attempt < self.max_attempts && is_transient(status)
    }
}

pub fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_each_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::from_secs(1));
        assert_eq!(policy.delay_before(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before(3), Duration::from_secs(3));
    }

    #[test]
    fn server_errors_retry_until_the_last_attempt() {
        let policy = RetryPolicy::default();
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            assert!(policy.should_retry(status, 1));
            assert!(policy.should_retry(status, 2));
            assert!(!policy.should_retry(status, 3));
        }
    }

    #[test]
    fn other_failures_are_not_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(StatusCode::NOT_FOUND, 1));
        assert!(!policy.should_retry(StatusCode::FORBIDDEN, 1));
        assert!(!policy.should_retry(StatusCode::TOO_MANY_REQUESTS, 1));
        assert!(!policy.should_retry(StatusCode::NOT_IMPLEMENTED, 1));
        assert!(!policy.should_retry(StatusCode::OK, 1));
    }
}
