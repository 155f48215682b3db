//! Error taxonomy shared by every crate in the gateway.
//!
//! `GatewayError` is the one error type the request-path domain logic returns; the HTTP
//! boundary (`gateway-server`'s `ApiError`) maps each variant to a status code and the
//! wire `error.type` shape.

/// Result type aliased to `GatewayError`.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Wire error kind, matching the `error.type` field of the JSON error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credential missing, malformed, or hash mismatch.
    AuthenticationError,
    /// Authenticated but not permitted (banned user, model not allowed).
    PermissionError,
    /// Malformed or out-of-range request field.
    InvalidRequestError,
    /// Referenced entity (model, route) does not exist.
    NotFound,
    /// A rate-limit dimension was exceeded.
    RateLimitExceeded,
    /// A monthly output-token budget was exceeded.
    BudgetExceeded,
    /// All endpoints in the failover chain were exhausted.
    ServiceUnavailable,
    /// Unclassified internal failure.
    ServerError,
    /// Endpoint intentionally not implemented.
    NotImplemented,
}

impl ErrorKind {
    /// The wire string for this kind, as it appears in `error.type`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationError => "authentication_error",
            Self::PermissionError => "permission_error",
            Self::InvalidRequestError => "invalid_request_error",
            Self::NotFound => "not_found",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::BudgetExceeded => "budget_exceeded",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ServerError => "server_error",
            Self::NotImplemented => "not_implemented",
        }
    }
}

/// Domain error shared across the gateway's crates.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A request field failed validation.
    #[error("{message}")]
    Validation {
        /// Human-readable message.
        message: String,
        /// Field the error applies to, if any.
        field: Option<String>,
        /// Stable machine-readable code for this validation failure.
        code: String,
    },

    /// Credential verification failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Caller is authenticated but not permitted to perform this action.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A rate-limit dimension was exceeded.
    #[error("rate limit exceeded: {dimension} {used}/{limit}")]
    RateLimited {
        /// Which dimension was exceeded (`rpm`, `tpm`, `tph`, `tpd`).
        dimension: String,
        /// Units currently used in the window.
        used: u64,
        /// The effective limit.
        limit: u64,
        /// Seconds the client should wait before retrying.
        retry_after_secs: u64,
    },

    /// A monthly output-token budget was exceeded.
    #[error("budget exceeded for {scope} {id}: {used}/{budget}")]
    BudgetExceeded {
        /// Scope the budget applies to (`user`, `token`, `dept`).
        scope: String,
        /// Scope identifier.
        id: String,
        /// Units used so far this month.
        used: u64,
        /// The monthly budget.
        budget: u64,
    },

    /// Every endpoint in the failover chain was exhausted.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An endpoint is intentionally unimplemented.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Upstream returned an error the gateway forwards verbatim.
    #[error("upstream error (status {status}): {body}")]
    Upstream {
        /// Upstream HTTP status code.
        status: u16,
        /// Raw upstream response body.
        body: String,
    },

    /// Unclassified internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Construct a validation error.
    #[must_use]
    pub fn validation(
        message: impl Into<String>,
        field: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field,
            code: code.into(),
        }
    }

    /// Construct an internal error from any displayable cause.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The wire error kind this variant maps to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::InvalidRequestError,
            Self::Authentication(_) => ErrorKind::AuthenticationError,
            Self::Permission(_) => ErrorKind::PermissionError,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimitExceeded,
            Self::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
            Self::Upstream { .. } | Self::Internal(_) => ErrorKind::ServerError,
        }
    }

    /// The field this error applies to, if any (used to populate `error.param`).
    #[must_use]
    pub fn param(&self) -> Option<String> {
        match self {
            Self::Validation { field, .. } => field.clone(),
            Self::RateLimited { dimension, .. } => Some(dimension.clone()),
            _ => None,
        }
    }

    /// Seconds the client should wait before retrying, if applicable.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_kind_and_param() {
        let err = GatewayError::validation("bad model", Some("model".to_string()), "empty_model");
        assert_eq!(err.kind(), ErrorKind::InvalidRequestError);
        assert_eq!(err.kind().as_str(), "invalid_request_error");
        assert_eq!(err.param(), Some("model".to_string()));
    }

    #[test]
    fn test_rate_limited_kind_and_retry_after() {
        let err = GatewayError::RateLimited {
            dimension: "rpm".to_string(),
            used: 10,
            limit: 10,
            retry_after_secs: 60,
        };
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(err.param(), Some("rpm".to_string()));
        assert_eq!(err.retry_after_secs(), Some(60));
    }

    #[test]
    fn test_budget_exceeded_kind() {
        let err = GatewayError::BudgetExceeded {
            scope: "dept".to_string(),
            id: "eng".to_string(),
            used: 1_000,
            budget: 1_000,
        };
        assert_eq!(err.kind(), ErrorKind::BudgetExceeded);
        assert!(err.to_string().contains("eng"));
    }

    #[test]
    fn test_service_unavailable_kind() {
        let err = GatewayError::ServiceUnavailable("all endpoints exhausted".to_string());
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(err.param(), None);
    }

    #[test]
    fn test_upstream_and_internal_map_to_server_error() {
        let upstream = GatewayError::Upstream {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(upstream.kind(), ErrorKind::ServerError);

        let internal = GatewayError::internal("unreachable state");
        assert_eq!(internal.kind(), ErrorKind::ServerError);
    }
}
