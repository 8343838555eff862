//! Logging setup with optional daily-rotated file output
//!
//! stderr output is always available; a file layer is added when a log file
//! is configured, and either layer can emit JSON.

use crate::config::LoggingConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level
    pub level: Level,

    /// Log to file
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,

    /// Include thread IDs
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            stderr: true,
            json: false,
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Build from the `[logging]` section, then apply environment overrides
    pub fn from_config(section: &LoggingConfig) -> Self {
        let mut config = Self {
            level: parse_level(&section.level).unwrap_or(Level::INFO),
            file_path: section.file.clone(),
            json: section.json_format,
            ..Self::default()
        };
        config.apply_env();
        config
    }

    /// Create config from environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            if let Some(level) = parse_level(&rust_log) {
                self.level = level;
            }
        }

        if let Ok(log_file) = std::env::var("PLANT_LOG_FILE") {
            self.file_path = Some(PathBuf::from(log_file));
        }

        if let Ok(json) = std::env::var("PLANT_LOG_JSON") {
            self.json = json.eq_ignore_ascii_case("true") || json == "1";
        }

        if let Ok(log_stderr) = std::env::var("PLANT_LOG_STDERR") {
            self.stderr = log_stderr.to_lowercase() != "false";
        }
    }
}

fn parse_level(raw: &str) -> Option<Level> {
    let raw = raw.to_lowercase();
    if raw.contains("trace") {
        Some(Level::TRACE)
    } else if raw.contains("debug") {
        Some(Level::DEBUG)
    } else if raw.contains("info") {
        Some(Level::INFO)
    } else if raw.contains("warn") {
        Some(Level::WARN)
    } else if raw.contains("error") {
        Some(Level::ERROR)
    } else {
        None
    }
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

fn output_layer<S, W>(writer: W, ansi: bool, json: bool, thread_ids: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_thread_ids(thread_ids)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_ids(thread_ids)
            .boxed()
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer<tracing_subscriber::Registry>> = Vec::new();

    if config.stderr {
        layers.push(output_layer(
            std::io::stderr,
            true,
            config.json,
            config.thread_ids,
        ));
    }

    if let Some(file_path) = config.file_path {
        let directory = file_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&directory)?;

        let file_name = file_path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "plant-control.log".into());

        let file_appender = tracing_appender::rolling::daily(directory, file_name);
        layers.push(output_layer(
            file_appender,
            false,
            config.json,
            config.thread_ids,
        ));
    }

    let subscriber = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter);

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level("plant_control=trace"), Some(Level::TRACE));
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn test_from_config_section() {
        let section = LoggingConfig {
            level: "warn".to_string(),
            json_format: true,
            file: Some(PathBuf::from("/tmp/plant/plant.log")),
        };
        let config = temp_env::with_vars_unset(
            ["RUST_LOG", "PLANT_LOG_FILE", "PLANT_LOG_JSON", "PLANT_LOG_STDERR"],
            || LogConfig::from_config(&section),
        );
        assert_eq!(config.level, Level::WARN);
        assert!(config.json);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/plant/plant.log")));
    }
}
