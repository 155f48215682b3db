//! HTTP error boundary: maps [`GatewayError`] (and rejection errors raised by
//! extractors) onto the wire error shape `{"error":{"type","message","param"}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::{ErrorKind, GatewayError};
use serde::Serialize;

/// An error ready to be turned into an HTTP response.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code to return.
    pub status: StatusCode,
    /// Wire `error.type` value.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Offending request parameter, if identifiable.
    pub param: Option<String>,
    /// `Retry-After` header value in seconds, if applicable.
    pub retry_after: Option<u64>,
}

impl ApiError {
    /// Construct a 400 Bad Request with `ErrorKind::InvalidRequestError`.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: ErrorKind::InvalidRequestError,
            message: message.into(),
            param: None,
            retry_after: None,
        }
    }

    /// Construct a 401 Unauthorized with `ErrorKind::AuthenticationError`.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            kind: ErrorKind::AuthenticationError,
            message: message.into(),
            param: None,
            retry_after: None,
        }
    }

    /// Construct a 500 Internal Server Error with `ErrorKind::ServerError`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: ErrorKind::ServerError,
            message: message.into(),
            param: None,
            retry_after: None,
        }
    }

    /// Attach the offending parameter name.
    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind.as_str(),
                message: self.message,
                param: self.param,
            },
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let kind = err.kind();
        let param = err.param();
        let retry_after = err.retry_after_secs();
        let status = match kind {
            ErrorKind::AuthenticationError => StatusCode::UNAUTHORIZED,
            ErrorKind::PermissionError => StatusCode::FORBIDDEN,
            ErrorKind::InvalidRequestError => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimitExceeded | ErrorKind::BudgetExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            status,
            kind,
            message: err.to_string(),
            param,
            retry_after,
        }
    }
}
