//! Bearer-token authentication.
//!
//! Every API token is stored as a SHA-256 hash of its plaintext value (prefixed
//! `sk-`). A request authenticates by presenting `Authorization: Bearer sk-...`; the
//! middleware hashes the presented value, looks it up, and rejects disabled, banned,
//! or expired tokens. `last_used_at` is updated best-effort in the background so a
//! slow accounting write never adds latency to the request path.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use gateway_migrations::{Repository, TokenRow};
use gateway_security::HashingService;
use std::sync::Arc;
use uuid::Uuid;

const TOKEN_PREFIX: &str = "sk-";

/// Paths that never require authentication.
const PUBLIC_PATHS: &[&str] = &[
    "/health", "/healthz", "/ready", "/readyz", "/live", "/livez", "/metrics",
];

/// The caller identity attached to a request's extensions once authenticated.
#[derive(Debug, Clone)]
pub struct AuthenticatedEntity {
    /// The token's id.
    pub token_id: Uuid,
    /// The owning user's id.
    pub user_id: Uuid,
    /// The owning user's department, used for department-scoped budgets and limits.
    pub department: String,
    /// Models this token may address; empty means no restriction.
    pub allowed_models: Vec<String>,
    /// Per-token rate-limit overrides (requests/minute, tokens/minute, /hour, /day).
    /// `None` inherits the department or global default for that dimension.
    pub rate_limit_rpm: Option<u64>,
    /// Per-token tokens/minute override.
    pub rate_limit_tpm: Option<u64>,
    /// Per-token tokens/hour override.
    pub rate_limit_tph: Option<u64>,
    /// Per-token tokens/day override.
    pub rate_limit_tpd: Option<u64>,
    /// Monthly output-token budget override. `None` inherits, `Some(0)` is unlimited.
    pub monthly_budget_tokens: Option<i64>,
    /// Owning user's monthly output-token budget. `None` inherits, `Some(0)` is unlimited.
    pub user_monthly_budget_tokens: Option<i64>,
}

impl AuthenticatedEntity {
    /// Whether this token may address `model`, by id, name, or alias.
    #[must_use]
    pub fn may_use_model(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }

    fn from_row(row: TokenRow) -> Self {
        Self {
            token_id: row.id,
            user_id: row.user_id,
            department: row.department,
            allowed_models: row.allowed_models,
            rate_limit_rpm: row.rate_limit_rpm.map(|v| v.max(0) as u64),
            rate_limit_tpm: row.rate_limit_tpm.map(|v| v.max(0) as u64),
            rate_limit_tph: row.rate_limit_tph.map(|v| v.max(0) as u64),
            rate_limit_tpd: row.rate_limit_tpd.map(|v| v.max(0) as u64),
            monthly_budget_tokens: row.monthly_budget_tokens,
            user_monthly_budget_tokens: row.user_monthly_budget_tokens,
        }
    }
}

/// Reasons authentication can fail.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization` header present.
    #[error("missing bearer token")]
    MissingToken,
    /// `Authorization` header present but not a well-formed `sk-` bearer token.
    #[error("malformed bearer token")]
    MalformedToken,
    /// No token matches the presented value's hash.
    #[error("token not recognized")]
    InvalidToken,
    /// Token matched but has passed its `expires_at`.
    #[error("token expired")]
    Expired,
    /// Token matched but `enabled = false`.
    #[error("token disabled")]
    Disabled,
    /// Token matched but `banned = true`.
    #[error("token banned")]
    Banned,
    /// The persistent store could not be reached.
    #[error("authentication store unavailable: {0}")]
    Store(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::unauthorized(err.to_string())
    }
}

/// Hash a presented API key the same way stored `key_hash` columns are populated.
#[must_use]
pub fn hash_api_key(key: &str) -> String {
    HashingService::sha256_hex(key.as_bytes())
}

fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

fn bearer_token(request: &Request) -> Result<&str, AuthError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedToken)?;

    let token = header.strip_prefix("Bearer ").ok_or(AuthError::MalformedToken)?;
    if !token.starts_with(TOKEN_PREFIX) {
        return Err(AuthError::MalformedToken);
    }
    Ok(token)
}

async fn authenticate(
    repository: &Repository,
    token: &str,
) -> Result<AuthenticatedEntity, AuthError> {
    let hash = hash_api_key(token);

    let row = repository
        .find_token_by_hash(&hash)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?
        .ok_or(AuthError::InvalidToken)?;

    if row.banned {
        return Err(AuthError::Banned);
    }
    if !row.enabled {
        return Err(AuthError::Disabled);
    }
    if let Some(expires_at) = row.expires_at {
        if expires_at <= chrono::Utc::now() {
            return Err(AuthError::Expired);
        }
    }

    Ok(AuthenticatedEntity::from_row(row))
}

/// Axum middleware: authenticate the request and insert [`AuthenticatedEntity`] into
/// its extensions, or short-circuit with a 401.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_public_path(&path) {
        return next.run(request).await;
    }

    let token = match bearer_token(&request) {
        Ok(token) => token.to_string(),
        Err(err) => return ApiError::from(err).into_response(),
    };

    let entity = match authenticate(&state.repository, &token).await {
        Ok(entity) => entity,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let repository: Arc<Repository> = state.repository.clone();
    let token_id = entity.token_id;
    tokio::spawn(async move {
        if let Err(err) = repository.touch_last_used(token_id).await {
            tracing::warn!(token_id = %token_id, error = %err, "failed to record token last_used_at");
        }
    });

    request.extensions_mut().insert(entity);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_api_key_is_deterministic() {
        assert_eq!(hash_api_key("sk-abc123"), hash_api_key("sk-abc123"));
        assert_ne!(hash_api_key("sk-abc123"), hash_api_key("sk-def456"));
    }

    #[test]
    fn test_is_public_path() {
        assert!(is_public_path("/health"));
        assert!(is_public_path("/metrics"));
        assert!(!is_public_path("/v1/chat/completions"));
    }

    fn sample_entity(allowed_models: Vec<String>) -> AuthenticatedEntity {
        AuthenticatedEntity {
            token_id: Uuid::nil(),
            user_id: Uuid::nil(),
            department: "eng".to_string(),
            allowed_models,
            rate_limit_rpm: None,
            rate_limit_tpm: None,
            rate_limit_tph: None,
            rate_limit_tpd: None,
            monthly_budget_tokens: None,
            user_monthly_budget_tokens: None,
        }
    }

    #[test]
    fn test_may_use_model_unrestricted_when_empty() {
        assert!(sample_entity(vec![]).may_use_model("gpt-4"));
    }

    #[test]
    fn test_may_use_model_restricted() {
        let entity = sample_entity(vec!["gpt-4".to_string()]);
        assert!(entity.may_use_model("gpt-4"));
        assert!(!entity.may_use_model("claude-3"));
    }
}
