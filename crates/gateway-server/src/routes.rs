//! Route definitions for the gateway API.

use axum::{
    routing::{get, post},
    Router,
};

use crate::{auth::auth_middleware, handlers, middleware, state::AppState};

/// Create the main API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints, exempt from authentication (see `auth::PUBLIC_PATHS`).
        .route("/health", get(handlers::health_check))
        .route("/healthz", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/readyz", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        .route("/livez", get(handlers::liveness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        // OpenAI-compatible data plane, authenticated.
        .nest("/v1", openai_routes())
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn(middleware::response_time_middleware))
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
        .layer(axum::middleware::from_fn(middleware::security_headers_middleware))
        .layer(middleware::cors_layer())
        .with_state(state)
}

/// OpenAI-compatible API routes.
fn openai_routes() -> Router<AppState> {
    Router::new()
        .route("/chat/completions", post(handlers::chat_completion))
        .route("/completions", post(handlers::completions))
        .route("/embeddings", post(handlers::embeddings))
        .route("/models", get(handlers::list_models))
        .route("/models/:model_id", get(handlers::get_model))
}
