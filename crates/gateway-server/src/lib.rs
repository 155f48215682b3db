//! # Gateway Server
//!
//! HTTP server implementation for the LLM Inference Gateway.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - OpenAI-compatible API endpoints
//! - Bearer-token authentication, quota and budget enforcement
//! - Request forwarding with failover and streaming
//! - Enterprise health check system
//! - Graceful shutdown handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod budget;
pub mod error;
pub mod extractors;
pub mod forwarder;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod persistence;
pub mod quota;
pub mod reconcile;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;

// Re-export main types
pub use auth::{auth_middleware, hash_api_key, AuthError, AuthenticatedEntity};
pub use error::ApiError;
pub use health::{
    ComponentHealth, HealthChecker, HealthConfig, HealthResponse, HealthStatus,
    LivenessResponse, ReadinessResponse, StartupResponse,
};
pub use persistence::PersistentModelRepository;
pub use server::{Server, ServerConfig};
pub use shutdown::{
    GracefulServer, RequestGuard, ShutdownConfig, ShutdownCoordinator, ShutdownEvent,
    ShutdownPhase, ShutdownStats,
};
pub use state::{AppState, AppStateBuilder};
