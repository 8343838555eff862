//! Bounded retry with exponential backoff for field-bus operations
//!
//! Delay before retry `n` (0-based) is `initial_delay × multiplier^n`, capped
//! at `max_delay`, with optional jitter.

use crate::error::{PlantError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor (0.0 disables jitter)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Policy for field-bus register access
    pub fn fieldbus(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.jitter_factor > 0.0 {
            let spread = capped_ms * self.jitter_factor.min(1.0);
            let mut rng = rand::thread_rng();
            capped_ms - spread + rng.gen_range(0.0..=spread)
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Whether another attempt can help
    pub fn should_retry(&self, error: &PlantError) -> bool {
        match error {
            PlantError::NotConnected(_) | PlantError::ChannelUnavailable(_) => false,
            other => other.is_retryable(),
        }
    }
}

/// Retry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryStats {
    pub total_operations: u64,
    pub successful_first_attempt: u64,
    pub successful_after_retry: u64,
    pub failed_after_retries: u64,
    pub total_retry_attempts: u64,
    pub last_retry: Option<DateTime<Utc>>,
}

/// Retry executor
pub struct RetryExecutor {
    policy: RetryPolicy,
    stats: Arc<RwLock<RetryStats>>,
}

impl RetryExecutor {
    /// Create new retry executor
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: Arc::new(RwLock::new(RetryStats::default())),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute operation with retry policy
    pub async fn execute<F, T, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.write().await.total_operations += 1;

        let mut retry = 0;
        loop {
            match operation().await {
                Ok(result) => {
                    let mut stats = self.stats.write().await;
                    if retry == 0 {
                        stats.successful_first_attempt += 1;
                    } else {
                        stats.successful_after_retry += 1;
                        info!(attempts = retry + 1, "Operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !self.policy.should_retry(&error) {
                        debug!(error = %error, "Error not retryable");
                        return Err(error);
                    }

                    if retry >= self.policy.max_retries {
                        self.stats.write().await.failed_after_retries += 1;
                        warn!(attempts = retry + 1, error = %error, "Operation failed after retries");
                        return Err(error);
                    }

                    let delay = self.policy.calculate_delay(retry);
                    {
                        let mut stats = self.stats.write().await;
                        stats.total_retry_attempts += 1;
                        stats.last_retry = Some(Utc::now());
                    }

                    debug!(
                        retry = retry + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying operation"
                    );
                    sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }

    /// Get retry statistics
    pub async fn get_stats(&self) -> RetryStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::fieldbus(max_retries, Duration::from_millis(5))
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(500));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_jitter_stays_below_base_delay() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..20 {
            let delay = policy.calculate_delay(0);
            assert!(delay >= Duration::from_millis(250) && delay <= Duration::from_millis(500));
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(2));

        let counter = attempts.clone();
        let result = executor
            .execute(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PlantError::device_comm("crc mismatch"))
                    } else {
                        Ok(42u16)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let stats = executor.get_stats().await;
        assert_eq!(stats.successful_after_retry, 1);
        assert_eq!(stats.total_retry_attempts, 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(2));

        let counter = attempts.clone();
        let result: Result<()> = executor
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PlantError::timeout("fieldbus"))
                }
            })
            .await;

        assert!(matches!(result, Err(PlantError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_connected_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(2));

        let counter = attempts.clone();
        let result: Result<()> = executor
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PlantError::not_connected("fieldbus"))
                }
            })
            .await;

        assert!(matches!(result, Err(PlantError::NotConnected(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
