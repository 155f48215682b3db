//! # LLM Inference Gateway
//!
//! Enterprise-grade, OpenAI-compatible API gateway for Large Language Models.
//!
//! ## Features
//!
//! - Per-tenant quota (RPM/TPM/TPH/TPD) and monthly budget enforcement
//! - Model routing with endpoint failover and circuit breaking
//! - Streaming and non-streaming chat completions, usage reconciliation
//! - Prometheus metrics and structured logging
//!
//! ## Usage
//!
//! ```bash
//! # Start with default configuration (environment variables only)
//! llm-gateway
//!
//! # Start with a config file, overlaid with environment variables
//! llm-gateway /path/to/config.yaml
//! ```

use gateway_server::{AppState, Server, ServerConfig};
use gateway_telemetry::{init_logging, LoggingConfig};
use std::path::PathBuf;
use tracing::{error, info};

/// Application entry point.
#[tokio::main]
async fn main() {
    if let Err(e) = init_logging(&LoggingConfig::new().with_level("info")) {
        eprintln!("failed to initialize logging: {e}");
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting llm-gateway");

    if let Err(e) = run().await {
        error!(error = %e, "application failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = gateway_config::load(config_path.as_deref())?;

    info!(host = %config.server.host, port = config.server.port, "configuration loaded");

    let server_config = ServerConfig::new()
        .with_host(config.server.host.clone())
        .with_port(config.server.port);

    let state = AppState::builder(config).build().await?;
    let server = Server::new(server_config, state);

    server.run().await
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_binary_compiles() {}
}
