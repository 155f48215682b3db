//! Upstream endpoint descriptors.
//!
//! A "provider" in this gateway is not a vendor-specific dialect to translate against;
//! every upstream speaks the same OpenAI-compatible wire format (see the purpose and
//! scope notes on protocol translation). What varies per endpoint is only its URL,
//! credential, header overrides, and the model name to send upstream — this module
//! models exactly that, plus the health state the endpoint selector consults.

use crate::types::{ApiKey, ProviderId};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// A single upstream target: the gateway's primary model row, or one of its sub-model
/// rows. The ordered set of `Endpoint`s for a model is the failover chain the selector
/// walks.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Identifier for this endpoint (the owning model or sub-model row id), used to key
    /// circuit-breaker and round-robin state.
    pub id: ProviderId,
    /// Base URL to send the chat/completions or embeddings request to.
    pub url: String,
    /// Bearer credential to send upstream, if configured.
    pub api_key: Option<ApiKey>,
    /// Model name to substitute into the outbound body in place of the caller's model.
    pub model_name: String,
    /// Header overrides merged into the outbound request, excluding the two reserved
    /// keys `Content-Type` and `Authorization`.
    pub extra_headers: HashMap<String, String>,
}

impl Endpoint {
    /// Construct an endpoint descriptor.
    #[must_use]
    pub fn new(id: ProviderId, url: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            api_key: None,
            model_name: model_name.into(),
            extra_headers: HashMap::new(),
        }
    }

    /// Attach a bearer credential.
    #[must_use]
    pub fn with_api_key(mut self, api_key: ApiKey) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Attach header overrides.
    #[must_use]
    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = headers;
        self
    }
}

/// Aggregate health of an external dependency, as reported by `/v1/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Dependency answered within its check timeout.
    Healthy,
    /// Dependency answered but with degraded latency or a partial failure.
    Degraded,
    /// Dependency did not answer within its check timeout.
    Unavailable,
}

impl HealthStatus {
    /// Whether this status should fail the overall health check.
    #[must_use]
    pub fn is_unavailable(self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

/// Circuit-breaker-relevant health of one endpoint, mirroring the `EndpointHealth`
/// persistent row and the `cb:<url>:*` counter-store keys.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    /// The endpoint this health record describes.
    pub url: String,
    /// Consecutive failures observed since the last success.
    pub consecutive_failures: u32,
    /// If set and in the future, the breaker is open until this instant.
    pub open_until: Option<SystemTime>,
}

impl EndpointHealth {
    /// Construct a healthy (closed-breaker) record for a fresh endpoint.
    #[must_use]
    pub fn closed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            consecutive_failures: 0,
            open_until: None,
        }
    }

    /// Whether the breaker currently permits traffic to this endpoint.
    #[must_use]
    pub fn is_available(&self, now: SystemTime) -> bool {
        match self.open_until {
            Some(until) => until <= now,
            None => true,
        }
    }

    /// Record a failure, opening the breaker once the threshold is reached.
    pub fn record_failure(&mut self, threshold: u32, open_duration: Duration, now: SystemTime) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= threshold {
            self.open_until = Some(now + open_duration);
        }
    }

    /// Record a success, resetting the breaker to closed.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }
}
