//! # Gateway Config
//!
//! Typed configuration for the gateway, loaded from a YAML/TOML file and overlaid with
//! environment variables (env wins), validated at load, and exposed behind an
//! atomically-swappable snapshot so a config reload never races a concurrent reader.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod settings;
pub mod watch;

pub use error::{ConfigError, ConfigResult};
pub use loader::load;
pub use settings::{
    BreakerConfig, GatewayConfig, RateLimitDefaults, ServerConfig, StoreConfig,
};
pub use watch::ConfigHandle;
