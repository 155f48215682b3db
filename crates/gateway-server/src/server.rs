//! Top-level server runtime: binds a listener, serves the router, and drains
//! in-flight requests on shutdown.

use crate::routes::create_router;
use crate::shutdown::{GracefulServer, ShutdownConfig};
use crate::state::AppState;
use std::net::SocketAddr;
use tracing::info;

/// Bind address and shutdown tuning for [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Graceful shutdown tuning.
    pub shutdown: ShutdownConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Start from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the graceful shutdown configuration.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownConfig) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Owns the router and listener; `run` blocks until a shutdown signal is received and
/// in-flight requests have drained.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Build a server from a bind configuration and an already-assembled [`AppState`].
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Bind the listener and serve until a shutdown signal arrives, draining
    /// in-flight requests per the configured graceful timeout.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.config.socket_addr()?;
        let router = create_router(self.state);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(address = %addr, "gateway listening");

        let graceful = GracefulServer::new(self.config.shutdown);
        graceful
            .run_until_shutdown(|coordinator| async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(coordinator.shutdown_signal())
                    .await
                    .map_err(Box::<dyn std::error::Error + Send + Sync>::from)
            })
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new().with_host("127.0.0.1").with_port(8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_invalid_host_fails_to_parse() {
        let config = ServerConfig::new().with_host("not-a-host");
        assert!(config.socket_addr().is_err());
    }
}
