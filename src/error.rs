//! Error types for the plant controller
//!
//! Structured error codes, severities and logging helpers shared by the
//! control core, the device layer and the reliability wrappers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for plant operations
pub type Result<T> = std::result::Result<T, PlantError>;

/// Error types for plant control operations
#[derive(Error, Debug)]
pub enum PlantError {
    /// Setpoint table has no row for the requested key
    #[error("Setpoint lookup miss: no {table} row for {key}")]
    LookupMiss { table: &'static str, key: i64 },

    /// Requested change would break a mutual-exclusion rule
    #[error("Interlock violation: {0}")]
    InterlockViolation(String),

    /// Circuit breaker open for the channel
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Serial or field-bus I/O failed
    #[error("Device communication error: {0}")]
    DeviceComm(String),

    /// Field-bus link is not connected
    #[error("Device not connected: {0}")]
    NotConnected(String),

    /// Plant forced off, automatic control halted
    #[error("Emergency shutdown: {0}")]
    EmergencyShutdown(String),

    /// Command issued before the channel's minimum interval elapsed
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Hardware call exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Writes refused because the controller runs read-only
    #[error("Read-only mode: {0}")]
    ReadOnly(String),

    /// Temperature sensor could not be read
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Settings, device or sample store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Structured error code for machine-readable error handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Control errors (1000-1099)
    SetpointLookupMiss,
    InterlockViolation,
    EmergencyShutdown,

    // Channel errors (1100-1199)
    ChannelUnavailable,
    RateLimitExceeded,
    ChannelTimeout,

    // Device errors (1200-1299)
    DeviceCommFailed,
    DeviceNotConnected,
    DeviceNotFound,
    SensorFailed,

    // Configuration errors (1300-1399)
    ConfigurationInvalid,
    ReadOnlyMode,

    // Data errors (1400-1499)
    InvalidInput,
    ParsingFailed,
    StorageFailed,

    // Service errors (1500-1599)
    ExternalServiceError,

    // Internal errors (1900-1999)
    InternalError,
}

impl ErrorCode {
    /// Get numeric error code
    pub fn as_number(&self) -> u32 {
        match self {
            ErrorCode::SetpointLookupMiss => 1001,
            ErrorCode::InterlockViolation => 1002,
            ErrorCode::EmergencyShutdown => 1003,

            ErrorCode::ChannelUnavailable => 1101,
            ErrorCode::RateLimitExceeded => 1102,
            ErrorCode::ChannelTimeout => 1103,

            ErrorCode::DeviceCommFailed => 1201,
            ErrorCode::DeviceNotConnected => 1202,
            ErrorCode::DeviceNotFound => 1203,
            ErrorCode::SensorFailed => 1204,

            ErrorCode::ConfigurationInvalid => 1301,
            ErrorCode::ReadOnlyMode => 1302,

            ErrorCode::InvalidInput => 1401,
            ErrorCode::ParsingFailed => 1402,
            ErrorCode::StorageFailed => 1403,

            ErrorCode::ExternalServiceError => 1501,

            ErrorCode::InternalError => 1901,
        }
    }

    /// Get error category
    pub fn category(&self) -> &'static str {
        match self.as_number() {
            1000..=1099 => "control",
            1100..=1199 => "channel",
            1200..=1299 => "device",
            1300..=1399 => "configuration",
            1400..=1499 => "data",
            1500..=1599 => "service",
            1900..=1999 => "internal",
            _ => "unknown",
        }
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Information only
    Info,
    /// Warning condition
    Warning,
    /// Error condition
    Error,
    /// Operator attention required
    Critical,
}

/// Structured error context with additional metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Error code for machine processing
    pub code: ErrorCode,
    /// Component that generated the error
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional metadata about the error
    pub metadata: HashMap<String, serde_json::Value>,
    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Stack trace (only in debug builds)
    #[cfg(debug_assertions)]
    pub stack_trace: Option<String>,
}

impl ErrorContext {
    /// Create new error context
    pub fn new(code: ErrorCode, component: &str, operation: &str) -> Self {
        Self {
            code,
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now(),
            #[cfg(debug_assertions)]
            stack_trace: None,
        }
    }

    /// Add metadata to error context
    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add stack trace in debug builds
    #[cfg(debug_assertions)]
    pub fn with_stack_trace(mut self) -> Self {
        self.stack_trace = Some(format!("{:?}", backtrace::Backtrace::new()));
        self
    }
}

impl PlantError {
    pub fn interlock<S: Into<String>>(msg: S) -> Self {
        Self::InterlockViolation(msg.into())
    }

    pub fn channel_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ChannelUnavailable(msg.into())
    }

    pub fn device_comm<S: Into<String>>(msg: S) -> Self {
        Self::DeviceComm(msg.into())
    }

    pub fn not_connected<S: Into<String>>(msg: S) -> Self {
        Self::NotConnected(msg.into())
    }

    pub fn emergency<S: Into<String>>(msg: S) -> Self {
        Self::EmergencyShutdown(msg.into())
    }

    pub fn rate_limit<S: Into<String>>(msg: S) -> Self {
        Self::RateLimit(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn read_only<S: Into<String>>(msg: S) -> Self {
        Self::ReadOnly(msg.into())
    }

    pub fn sensor<S: Into<String>>(msg: S) -> Self {
        Self::Sensor(msg.into())
    }

    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Generic(anyhow::anyhow!(msg.into()))
    }

    /// Map PlantError to structured error code
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            PlantError::LookupMiss { .. } => ErrorCode::SetpointLookupMiss,
            PlantError::InterlockViolation(_) => ErrorCode::InterlockViolation,
            PlantError::EmergencyShutdown(_) => ErrorCode::EmergencyShutdown,
            PlantError::ChannelUnavailable(_) => ErrorCode::ChannelUnavailable,
            PlantError::RateLimit(_) => ErrorCode::RateLimitExceeded,
            PlantError::Timeout(_) => ErrorCode::ChannelTimeout,
            PlantError::DeviceComm(_) => ErrorCode::DeviceCommFailed,
            PlantError::NotConnected(_) => ErrorCode::DeviceNotConnected,
            PlantError::NotFound(_) => ErrorCode::DeviceNotFound,
            PlantError::Sensor(_) => ErrorCode::SensorFailed,
            PlantError::Config(_) => ErrorCode::ConfigurationInvalid,
            PlantError::ReadOnly(_) => ErrorCode::ReadOnlyMode,
            PlantError::InvalidInput(_) => ErrorCode::InvalidInput,
            PlantError::Json(_) => ErrorCode::ParsingFailed,
            PlantError::Storage(_) => ErrorCode::StorageFailed,
            PlantError::Http(_) => ErrorCode::ExternalServiceError,
            PlantError::Io(_) | PlantError::Generic(_) => ErrorCode::InternalError,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlantError::EmergencyShutdown(_) => ErrorSeverity::Critical,
            PlantError::LookupMiss { .. } | PlantError::RateLimit(_) => ErrorSeverity::Warning,
            PlantError::ChannelUnavailable(_) | PlantError::Timeout(_) => ErrorSeverity::Warning,
            PlantError::InterlockViolation(_) | PlantError::InvalidInput(_) => {
                ErrorSeverity::Warning
            }
            PlantError::ReadOnly(_) => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlantError::DeviceComm(_)
                | PlantError::Timeout(_)
                | PlantError::ChannelUnavailable(_)
                | PlantError::Http(_)
        )
    }

    /// Whether this failure should count against a channel's circuit breaker
    pub fn is_channel_failure(&self) -> bool {
        matches!(
            self,
            PlantError::DeviceComm(_) | PlantError::Timeout(_) | PlantError::NotConnected(_)
        )
    }
}

/// Error logging and reporting utilities
pub struct ErrorReporter;

impl ErrorReporter {
    /// Log an error with appropriate severity
    pub fn log_error(error: &PlantError, context: Option<ErrorContext>) {
        let code = error.to_error_code();
        let context =
            context.unwrap_or_else(|| ErrorContext::new(code.clone(), "unknown", "unknown"));

        match error.severity() {
            ErrorSeverity::Critical => {
                tracing::error!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component = context.component,
                    operation = context.operation,
                    metadata = ?context.metadata,
                    "Critical error occurred: {}",
                    error
                );
            }
            ErrorSeverity::Error => {
                tracing::error!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component = context.component,
                    operation = context.operation,
                    "Error occurred: {}",
                    error
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component = context.component,
                    operation = context.operation,
                    "Warning: {}",
                    error
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component = context.component,
                    operation = context.operation,
                    "Info: {}",
                    error
                );
            }
        }
    }

    /// Create an error context with stack trace (debug builds only)
    pub fn create_context(code: ErrorCode, component: &str, operation: &str) -> ErrorContext {
        #[cfg(debug_assertions)]
        {
            ErrorContext::new(code, component, operation).with_stack_trace()
        }

        #[cfg(not(debug_assertions))]
        {
            ErrorContext::new(code, component, operation)
        }
    }
}

/// Macro for easy structured error logging
#[macro_export]
macro_rules! log_structured_error {
    ($error:expr, $component:expr, $operation:expr) => {
        $crate::error::ErrorReporter::log_error(
            &$error,
            Some($crate::error::ErrorReporter::create_context(
                $error.to_error_code(),
                $component,
                $operation,
            )),
        )
    };
}

impl From<config::ConfigError> for PlantError {
    fn from(err: config::ConfigError) -> Self {
        PlantError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for PlantError {
    fn from(err: toml::de::Error) -> Self {
        PlantError::Config(format!("TOML parse error: {err}"))
    }
}
