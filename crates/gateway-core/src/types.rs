//! Validated domain newtypes shared across the gateway.

use crate::error::GatewayError;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a single request, threaded through logs and tracing spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a new random request id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the inner UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated model identifier: the id, name, or alias a caller referred to a model by.
///
/// Resolution against the configured model set happens downstream; this type only
/// guarantees the string is non-empty and free of whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Validate and construct a model id.
    ///
    /// # Errors
    /// Returns an error if the identifier is empty or contains whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, GatewayError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(GatewayError::validation(
                "model id cannot be empty",
                Some("model".to_string()),
                "empty_model",
            ));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(GatewayError::validation(
                "model id cannot contain whitespace",
                Some("model".to_string()),
                "invalid_model",
            ));
        }
        Ok(Self(id))
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a configured upstream endpoint (primary model row or sub-model row).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Construct a provider/endpoint id from its underlying url or row id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a tenant scope (department name), used to key budget and rate-limit overrides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Construct a tenant id.
    ///
    /// # Errors
    /// Returns an error if the identifier is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, GatewayError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(GatewayError::validation(
                "tenant id cannot be empty",
                Some("tenant_id".to_string()),
                "empty_tenant_id",
            ));
        }
        Ok(Self(id))
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw bearer key or upstream endpoint key. Never logged or displayed.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(Secret<String>);

impl ApiKey {
    /// Wrap a raw key value.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(Secret::new(raw.into()))
    }

    /// Expose the raw key value. Callers must not log the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(redacted)")
    }
}

/// Sampling temperature, validated to the 0.0-2.0 range accepted by chat completion APIs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(f32);

impl Temperature {
    /// Validate and construct a temperature value.
    ///
    /// # Errors
    /// Returns an error if the value is outside `0.0..=2.0`.
    pub fn new(value: f32) -> Result<Self, GatewayError> {
        if !(0.0..=2.0).contains(&value) {
            return Err(GatewayError::validation(
                format!("temperature must be between 0.0 and 2.0, got {value}"),
                Some("temperature".to_string()),
                "invalid_temperature",
            ));
        }
        Ok(Self(value))
    }

    /// Get the raw value.
    #[must_use]
    pub fn value(&self) -> f32 {
        self.0
    }
}

/// Nucleus sampling parameter, validated to `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopP(f32);

impl TopP {
    /// Validate and construct a top-p value.
    ///
    /// # Errors
    /// Returns an error if the value is outside `0.0..=1.0`.
    pub fn new(value: f32) -> Result<Self, GatewayError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(GatewayError::validation(
                format!("top_p must be between 0.0 and 1.0, got {value}"),
                Some("top_p".to_string()),
                "invalid_top_p",
            ));
        }
        Ok(Self(value))
    }

    /// Get the raw value.
    #[must_use]
    pub fn value(&self) -> f32 {
        self.0
    }
}

/// Top-k sampling parameter. Providers that ignore it simply drop the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopK(u32);

impl TopK {
    /// Validate and construct a top-k value.
    ///
    /// # Errors
    /// Returns an error if the value is zero.
    pub fn new(value: u32) -> Result<Self, GatewayError> {
        if value == 0 {
            return Err(GatewayError::validation(
                "top_k must be greater than 0",
                Some("top_k".to_string()),
                "invalid_top_k",
            ));
        }
        Ok(Self(value))
    }

    /// Get the raw value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Maximum generated tokens, validated against a generous upper bound.
///
/// The upstream model's actual context window is enforced by the provider, not here;
/// this guards only against obviously malformed client input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaxTokens(u32);

impl MaxTokens {
    const UPPER_BOUND: u32 = 1_000_000;

    /// Validate and construct a max-tokens value.
    ///
    /// # Errors
    /// Returns an error if the value is zero or unreasonably large.
    pub fn new(value: u32) -> Result<Self, GatewayError> {
        if value == 0 || value > Self::UPPER_BOUND {
            return Err(GatewayError::validation(
                format!("max_tokens must be between 1 and {}, got {value}", Self::UPPER_BOUND),
                Some("max_tokens".to_string()),
                "invalid_max_tokens",
            ));
        }
        Ok(Self(value))
    }

    /// Get the raw value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// A per-dimension limit value, whose three-valued meaning (inherit/unlimited/cap) is
/// semantic: database `NULL`/`0`/positive-integer columns deserialize into this directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// No override at this scope; fall through to the next scope in the resolution order.
    Inherit,
    /// Explicitly unlimited at this scope; resolution stops here.
    Unlimited,
    /// An enforced cap at this scope; resolution stops here.
    Cap(u64),
}

impl Limit {
    /// Build a `Limit` from the database's three-valued encoding: `None` = inherit,
    /// `Some(0)` = unlimited, `Some(n>0)` = cap.
    #[must_use]
    pub fn from_nullable(value: Option<u64>) -> Self {
        match value {
            None => Self::Inherit,
            Some(0) => Self::Unlimited,
            Some(n) => Self::Cap(n),
        }
    }

    /// Resolve a limit across scopes in precedence order, stopping at the first
    /// non-`Inherit` value. Returns `None` if every scope inherits (treated as unlimited
    /// by callers).
    #[must_use]
    pub fn resolve(scopes: &[Self]) -> Option<Self> {
        scopes.iter().find(|l| !matches!(l, Self::Inherit)).copied()
    }

    /// Whether this resolved limit permits `used` more units before `used + 1` would
    /// exceed it. `Unlimited` always permits; `Cap(n)` permits while `used < n`.
    #[must_use]
    pub fn permits(&self, used: u64) -> bool {
        match self {
            Self::Inherit | Self::Unlimited => true,
            Self::Cap(n) => used < *n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_rejects_empty_and_whitespace() {
        assert!(ModelId::new("").is_err());
        assert!(ModelId::new("gpt 4").is_err());
        assert!(ModelId::new("gpt-4").is_ok());
    }

    #[test]
    fn test_temperature_bounds() {
        assert!(Temperature::new(-0.1).is_err());
        assert!(Temperature::new(2.1).is_err());
        assert!(Temperature::new(0.7).is_ok());
    }

    #[test]
    fn test_top_p_bounds() {
        assert!(TopP::new(-0.1).is_err());
        assert!(TopP::new(1.1).is_err());
        assert!(TopP::new(1.0).is_ok());
    }

    #[test]
    fn test_max_tokens_bounds() {
        assert!(MaxTokens::new(0).is_err());
        assert!(MaxTokens::new(2_000_000).is_err());
        assert!(MaxTokens::new(512).is_ok());
    }

    #[test]
    fn test_api_key_debug_redacted() {
        let key = ApiKey::new("sk-super-secret");
        assert_eq!(format!("{key:?}"), "ApiKey(redacted)");
        assert_eq!(key.expose(), "sk-super-secret");
    }

    #[test]
    fn test_limit_resolution_order() {
        let token = Limit::Inherit;
        let dept = Limit::Cap(100);
        let global = Limit::Cap(10);
        assert_eq!(Limit::resolve(&[token, dept, global]), Some(Limit::Cap(100)));

        let token = Limit::Cap(0);
        assert_eq!(token, Limit::Cap(0));
    }

    #[test]
    fn test_limit_unlimited_short_circuits() {
        let token = Limit::Unlimited;
        let dept = Limit::Cap(100);
        assert_eq!(Limit::resolve(&[token, dept]), Some(Limit::Unlimited));
    }

    #[test]
    fn test_limit_permits() {
        assert!(Limit::Unlimited.permits(u64::MAX));
        assert!(Limit::Cap(5).permits(4));
        assert!(!Limit::Cap(5).permits(5));
    }

    #[test]
    fn test_limit_from_nullable() {
        assert_eq!(Limit::from_nullable(None), Limit::Inherit);
        assert_eq!(Limit::from_nullable(Some(0)), Limit::Unlimited);
        assert_eq!(Limit::from_nullable(Some(42)), Limit::Cap(42));
    }
}
