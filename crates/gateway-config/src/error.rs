//! Configuration error type.

/// Result type aliased to `ConfigError`.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading, parsing, or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file could not be parsed as YAML.
    #[error("failed to parse config file as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The config file could not be parsed as TOML.
    #[error("failed to parse config file as TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// An environment variable held a value of the wrong type.
    #[error("invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Raw value that failed to parse.
        value: String,
    },

    /// The loaded config failed a validation rule.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    /// Construct a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
