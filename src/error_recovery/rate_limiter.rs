//! Minimum spacing between state-changing commands on one channel
//!
//! Season-switch and emergency commands are exempt; they must never be
//! delayed by an earlier automatic command.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rate limiter decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Command may be sent
    Allowed,
    /// Command bypasses the limiter
    Exempt,
    /// Too soon after the previous command
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, RateDecision::Limited { .. })
    }
}

/// Per-channel command spacing
pub struct RateLimiter {
    min_interval: Duration,
    last_command: Arc<RwLock<HashMap<String, Instant>>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_command: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check whether a command may go out now; does not record it
    pub async fn check(&self, channel: &str, exempt: bool) -> RateDecision {
        if exempt {
            debug!(channel = channel, "Command exempt from rate limiting");
            return RateDecision::Exempt;
        }

        let last_command = self.last_command.read().await;
        match last_command.get(channel) {
            Some(last) => {
                let elapsed = last.elapsed();
                if elapsed >= self.min_interval {
                    RateDecision::Allowed
                } else {
                    let retry_after = self.min_interval - elapsed;
                    warn!(
                        channel = channel,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Command rate limited"
                    );
                    RateDecision::Limited { retry_after }
                }
            }
            None => RateDecision::Allowed,
        }
    }

    /// Record that a command went out on the channel
    pub async fn mark(&self, channel: &str) {
        self.last_command
            .write()
            .await
            .insert(channel.to_string(), Instant::now());
    }

    /// Forget every channel's history
    pub async fn clear(&self) {
        self.last_command.write().await.clear();
    }
}
