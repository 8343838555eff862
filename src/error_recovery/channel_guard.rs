//! Channel guard combining circuit breaker, rate limiter, timeout and retry
//!
//! Every hardware call goes through [`ChannelGuard`]. The order is fixed:
//! rate limiter decision, breaker admission, the call itself under a
//! deadline, then the outcome is recorded on the breaker. Rate-limited and
//! breaker-rejected calls never reach the transport.

use crate::config::ReliabilityConfig;
use crate::error::{PlantError, Result};
use crate::error_recovery::{
    CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerStats, RateDecision, RateLimiter,
    RetryExecutor,
};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// What kind of hardware access a call performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Read-back; never rate limited
    Read,
    /// State-changing command; `exempt` bypasses the rate limiter
    Command { exempt: bool },
}

/// Reliability wrapper shared by every hardware channel
pub struct ChannelGuard {
    breakers: CircuitBreakerManager,
    limiter: RateLimiter,
    command_timeout: Duration,
}

impl ChannelGuard {
    pub fn new(config: &ReliabilityConfig) -> Self {
        Self {
            breakers: CircuitBreakerManager::new(CircuitBreakerConfig {
                failure_threshold: config.failure_threshold,
                reset_timeout: config.reset_timeout,
            }),
            limiter: RateLimiter::new(config.min_command_interval),
            command_timeout: config.command_timeout,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Run one hardware call under the channel's deadline
    pub async fn call<F, Fut, T>(&self, channel: &str, kind: CallKind, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit(channel, kind).await?;
        let result = self.timed(channel, operation()).await;
        self.record(channel, &result).await;
        result
    }

    /// Run a retried hardware call; each attempt gets its own deadline and
    /// the breaker sees a single outcome
    pub async fn call_with_retry<F, Fut, T>(
        &self,
        channel: &str,
        kind: CallKind,
        retry: &RetryExecutor,
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit(channel, kind).await?;
        let result = retry
            .execute(|| self.timed(channel, operation()))
            .await;
        self.record(channel, &result).await;
        result
    }

    /// Wrap a future with the command deadline
    pub async fn timed<Fut, T>(&self, channel: &str, future: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.command_timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    channel = channel,
                    timeout_ms = self.command_timeout.as_millis() as u64,
                    "Hardware call timed out"
                );
                Err(PlantError::timeout(format!(
                    "{channel} did not answer within {:?}",
                    self.command_timeout
                )))
            }
        }
    }

    async fn admit(&self, channel: &str, kind: CallKind) -> Result<()> {
        let decision = match kind {
            CallKind::Read => RateDecision::Exempt,
            CallKind::Command { exempt } => self.limiter.check(channel, exempt).await,
        };
        if let RateDecision::Limited { retry_after } = decision {
            return Err(PlantError::rate_limit(format!(
                "{channel}: retry after {} ms",
                retry_after.as_millis()
            )));
        }

        let breaker = self.breakers.get_breaker(channel).await;
        if !breaker.should_allow_request().await {
            return Err(PlantError::channel_unavailable(format!(
                "{channel}: circuit breaker open"
            )));
        }

        if decision == RateDecision::Allowed && matches!(kind, CallKind::Command { .. }) {
            self.limiter.mark(channel).await;
        }
        Ok(())
    }

    async fn record<T>(&self, channel: &str, result: &Result<T>) {
        let breaker = self.breakers.get_breaker(channel).await;
        match result {
            Err(error) if error.is_channel_failure() => {
                debug!(channel = channel, error = %error, "Channel failure recorded");
                breaker.record_failure(error).await;
            }
            // any answer from the device counts as a live channel
            _ => breaker.record_success().await,
        }
    }

    /// Breaker statistics per channel
    pub async fn breaker_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        self.breakers.get_all_stats().await
    }

    /// Close every breaker and clear rate-limiter history
    pub async fn reset(&self) {
        self.breakers.reset_all().await;
        self.limiter.clear().await;
    }
}
