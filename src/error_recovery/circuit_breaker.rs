//! Per-channel circuit breaker
//!
//! Counts consecutive failures on one hardware channel. Once the threshold
//! is reached the channel is opened and calls fail fast until the reset
//! timeout has elapsed; then exactly one trial call is let through.

use crate::error::PlantError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - operations blocked
    Open,
    /// Circuit is half-open - one trial call in flight or pending
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub blocked_requests: u64,
    pub circuit_open_count: u64,
    /// Time left before an open circuit admits a trial call
    pub time_until_trial: Option<Duration>,
}

struct CircuitBreakerState {
    current_state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    total_failures: u64,
    total_successes: u64,
    blocked_requests: u64,
    circuit_open_count: u64,
}

/// Circuit breaker for one channel
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(RwLock::new(CircuitBreakerState {
                current_state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                total_failures: 0,
                total_successes: 0,
                blocked_requests: 0,
                circuit_open_count: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if a call may touch the hardware
    pub async fn should_allow_request(&self) -> bool {
        let mut state = self.state.write().await;

        match state.current_state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened| opened.elapsed())
                    .unwrap_or(self.config.reset_timeout);
                if elapsed >= self.config.reset_timeout {
                    state.current_state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    info!(channel = %self.name, "Circuit breaker half-open, allowing trial call");
                    true
                } else {
                    state.blocked_requests += 1;
                    debug!(
                        channel = %self.name,
                        remaining_ms = (self.config.reset_timeout - elapsed).as_millis() as u64,
                        "Circuit breaker open, blocking call"
                    );
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    state.blocked_requests += 1;
                    debug!(channel = %self.name, "Trial call already in flight, blocking call");
                    false
                } else {
                    state.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record successful operation
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.total_successes += 1;
        state.consecutive_failures = 0;

        if state.current_state != CircuitState::Closed {
            state.current_state = CircuitState::Closed;
            state.opened_at = None;
            state.trial_in_flight = false;
            info!(channel = %self.name, "Circuit breaker closed after successful trial");
        }
    }

    /// Record failed operation
    pub async fn record_failure(&self, error: &PlantError) {
        let mut state = self.state.write().await;
        state.total_failures += 1;

        match state.current_state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.current_state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    state.circuit_open_count += 1;
                    error!(
                        channel = %self.name,
                        failures = state.consecutive_failures,
                        last_error = %error,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.current_state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.trial_in_flight = false;
                state.circuit_open_count += 1;
                warn!(channel = %self.name, error = %error, "Trial call failed, circuit reopened");
            }
            CircuitState::Open => {
                debug!(channel = %self.name, "Failure recorded while circuit is open");
            }
        }
    }

    /// Current state of the circuit
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.current_state
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> CircuitBreakerStats {
        let state = self.state.read().await;
        let time_until_trial = match (state.current_state, state.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                Some(self.config.reset_timeout.saturating_sub(opened.elapsed()))
            }
            _ => None,
        };

        CircuitBreakerStats {
            state: state.current_state,
            consecutive_failures: state.consecutive_failures,
            total_failures: state.total_failures,
            total_successes: state.total_successes,
            blocked_requests: state.blocked_requests,
            circuit_open_count: state.circuit_open_count,
            time_until_trial,
        }
    }

    /// Reset circuit breaker
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.current_state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_in_flight = false;
        info!(channel = %self.name, "Circuit breaker reset to closed state");
    }
}

/// Circuit breakers keyed by channel name
pub struct CircuitBreakerManager {
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    /// Create new circuit breaker manager
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            default_config,
        }
    }

    /// Get or create circuit breaker for a channel
    pub async fn get_breaker(&self, channel: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(channel) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(channel.to_string())
            .or_insert_with(|| {
                debug!(channel = channel, "Created circuit breaker");
                Arc::new(CircuitBreaker::new(channel, self.default_config.clone()))
            })
            .clone()
    }

    /// Get all circuit breaker statistics
    pub async fn get_all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        let breakers = self.breakers.read().await;
        let mut stats = HashMap::new();
        for (name, breaker) in breakers.iter() {
            stats.insert(name.clone(), breaker.get_stats().await);
        }
        stats
    }

    /// Reset all circuit breakers
    pub async fn reset_all(&self) {
        let breakers = self.breakers.read().await;
        for breaker in breakers.values() {
            breaker.reset().await;
        }
    }
}
