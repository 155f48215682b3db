//! File + environment overlay config loading.
//!
//! Precedence, ascending: an optional YAML/TOML file on disk, then environment
//! variables. Anything set in the environment wins over the file.

use crate::error::ConfigError;
use crate::settings::GatewayConfig;
use secrecy::Secret;
use std::path::Path;

/// Load and validate a [`GatewayConfig`] from an optional file path, overlaid with
/// environment variables.
///
/// # Errors
/// Returns a [`ConfigError`] if the file cannot be read or parsed, an environment
/// variable holds a value of the wrong type, or the resulting config fails validation.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_file(path)?,
        None => default_skeleton(),
    };

    apply_env_overlay(&mut config)?;
    config.validate()?;
    Ok(config)
}

fn load_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(toml::from_str(&contents)?),
        _ => Ok(serde_yaml::from_str(&contents)?),
    }
}

/// A config skeleton with store URLs left empty, to be filled entirely by the
/// environment overlay. Validation runs after the overlay, so an unset store URL still
/// surfaces as a normal validation error rather than a panic.
fn default_skeleton() -> GatewayConfig {
    GatewayConfig {
        server: crate::settings::ServerConfig::default(),
        store: crate::settings::StoreConfig {
            persistent_store_url: Secret::new(String::new()),
            fast_store_url: Secret::new(String::new()),
        },
        rate_limit_defaults: crate::settings::RateLimitDefaults::default(),
        request_deadline: std::time::Duration::from_secs(120),
        breaker: crate::settings::BreakerConfig::default(),
        developers: Vec::new(),
    }
}

fn apply_env_overlay(config: &mut GatewayConfig) -> Result<(), ConfigError> {
    if let Some(port) = parse_env("PROXY_PORT")? {
        config.server.port = port;
    }
    if let Some(url) = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()) {
        config.store.persistent_store_url = Secret::new(url);
    }
    if let Some(url) = std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()) {
        config.store.fast_store_url = Secret::new(url);
    }
    if let Some(rpm) = parse_env("DEFAULT_RPM")? {
        config.rate_limit_defaults.rpm = rpm;
    }
    if let Some(tpm) = parse_env("DEFAULT_TPM")? {
        config.rate_limit_defaults.tpm = tpm;
    }
    if let Some(tph) = parse_env("DEFAULT_TPH")? {
        config.rate_limit_defaults.tph = tph;
    }
    if let Some(tpd) = parse_env("DEFAULT_TPD")? {
        config.rate_limit_defaults.tpd = tpd;
    }
    if let Ok(developers) = std::env::var("DEVELOPERS") {
        config.developers = developers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvVar {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn set_required_env() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/gateway");
        std::env::set_var("REDIS_URL", "redis://localhost");
    }

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "REDIS_URL",
            "PROXY_PORT",
            "DEFAULT_RPM",
            "DEFAULT_TPM",
            "DEFAULT_TPH",
            "DEFAULT_TPD",
            "DEVELOPERS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_load_from_env_only() {
        clear_env();
        set_required_env();
        std::env::set_var("PROXY_PORT", "8080");
        std::env::set_var("DEVELOPERS", "alice, bob");

        let config = load(None).expect("load");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.developers, vec!["alice".to_string(), "bob".to_string()]);
        clear_env();
    }

    #[test]
    fn test_missing_store_urls_fails_validation() {
        clear_env();
        let err = load(None).expect_err("should fail validation");
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_port_env_var_reports_name() {
        clear_env();
        set_required_env();
        std::env::set_var("PROXY_PORT", "not-a-port");
        let err = load(None).expect_err("should fail to parse");
        assert!(matches!(err, ConfigError::InvalidEnvVar { name, .. } if name == "PROXY_PORT"));
        clear_env();
    }

    #[test]
    fn test_file_then_env_precedence() {
        clear_env();
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").expect("tempfile");
        writeln!(
            file,
            "store:\n  persistent_store_url: postgres://file/gateway\n  fast_store_url: redis://file\nserver:\n  port: 3000\n"
        )
        .expect("write");

        std::env::set_var("PROXY_PORT", "9000");
        let config = load(Some(file.path())).expect("load");
        assert_eq!(config.server.port, 9000);
        clear_env();
    }
}
