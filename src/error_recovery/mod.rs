//! Reliability wrappers for hardware channels
//!
//! Circuit breakers, command rate limiting, bounded retries and per-call
//! deadlines, combined by [`ChannelGuard`].

pub mod channel_guard;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry_policy;

// Re-export commonly used types
pub use channel_guard::{CallKind, ChannelGuard};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerStats, CircuitState,
};
pub use rate_limiter::{RateDecision, RateLimiter};
pub use retry_policy::{RetryExecutor, RetryPolicy, RetryStats};
