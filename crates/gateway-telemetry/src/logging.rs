//! Structured logging setup, independent of the OpenTelemetry tracing pipeline.
//!
//! Used by binaries that want JSON or plain-text structured logs without paying for
//! a full OTLP exporter. `tracing_setup::init_tracing` covers the OTLP case.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default log level, used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit logs as JSON lines instead of the default human-readable format.
    pub json: bool,
    /// Include the target module path in each log line.
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Start from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default log level.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Switch to JSON-formatted log lines.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Error initializing the logging subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// A subscriber was already installed for this process.
    #[error("failed to install logging subscriber: {0}")]
    Init(String),
}

/// Initialize the global `tracing` subscriber for structured logging.
///
/// # Errors
/// Returns an error if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(config.with_target).with_filter(filter))
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(config.with_target).with_filter(filter))
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))
    }
}
