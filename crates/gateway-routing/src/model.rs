//! Model and sub-model domain records, and the repository trait resolution depends on.

use async_trait::async_trait;
use gateway_core::GatewayError;
use std::collections::HashMap;

/// A configured primary model row.
#[derive(Debug, Clone)]
pub struct ModelRecord {
    /// Row id.
    pub id: String,
    /// Canonical name.
    pub name: String,
    /// Optional alias callers may also address this model by.
    pub alias: Option<String>,
    /// Whether the model currently accepts traffic.
    pub enabled: bool,
    /// Primary upstream endpoint URL.
    pub endpoint_url: String,
    /// Bearer credential for the primary endpoint.
    pub api_key: Option<String>,
    /// Header overrides merged into the outbound request.
    pub extra_headers: HashMap<String, String>,
    /// Model name to send upstream; falls back to `name` when unset.
    pub upstream_model_name: Option<String>,
    /// Maximum tokens this model accepts, for request-side validation.
    pub max_tokens: Option<u32>,
}

impl ModelRecord {
    /// Whether `identifier` addresses this model by id, name, or alias.
    #[must_use]
    pub fn matches(&self, identifier: &str) -> bool {
        self.id == identifier
            || self.name == identifier
            || self.alias.as_deref() == Some(identifier)
    }

    /// The model name to substitute into the outbound body when a sub-model leaves its
    /// own override unset.
    #[must_use]
    pub fn default_upstream_name(&self) -> String {
        self.upstream_model_name.clone().unwrap_or_else(|| self.name.clone())
    }
}

/// A configured sub-model row augmenting a model's endpoint list.
#[derive(Debug, Clone)]
pub struct SubModelRecord {
    /// Owning model's id.
    pub parent_model_id: String,
    /// Position in the failover chain, ascending.
    pub sort_order: i32,
    /// Whether this sub-model currently accepts traffic.
    pub enabled: bool,
    /// Upstream endpoint URL.
    pub endpoint_url: String,
    /// Bearer credential for this endpoint.
    pub api_key: Option<String>,
    /// Header overrides merged into the outbound request.
    pub extra_headers: HashMap<String, String>,
    /// Model name override; falls back to the parent's default when unset.
    pub model_name: Option<String>,
}

/// Read access to the model/sub-model rows the resolver needs.
///
/// Implemented against the persistence crate in production; a fixture-backed
/// implementation is used in tests.
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Find an enabled model by id, name, or alias.
    ///
    /// # Errors
    /// Returns a [`GatewayError`] on a persistence failure.
    async fn find_enabled_model(&self, identifier: &str) -> Result<Option<ModelRecord>, GatewayError>;

    /// Find the enabled sub-models for `parent_model_id`, in no particular order; the
    /// resolver sorts them by `sort_order`.
    ///
    /// # Errors
    /// Returns a [`GatewayError`] on a persistence failure.
    async fn find_enabled_sub_models(
        &self,
        parent_model_id: &str,
    ) -> Result<Vec<SubModelRecord>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> ModelRecord {
        ModelRecord {
            id: "m1".to_string(),
            name: "gpt4".to_string(),
            alias: Some("gpt-4".to_string()),
            enabled: true,
            endpoint_url: "https://p.example/v1".to_string(),
            api_key: None,
            extra_headers: HashMap::new(),
            upstream_model_name: None,
            max_tokens: None,
        }
    }

    #[test]
    fn test_matches_by_id_name_or_alias() {
        let model = sample_model();
        assert!(model.matches("m1"));
        assert!(model.matches("gpt4"));
        assert!(model.matches("gpt-4"));
        assert!(!model.matches("claude-3"));
    }

    #[test]
    fn test_default_upstream_name_falls_back_to_name() {
        let model = sample_model();
        assert_eq!(model.default_upstream_name(), "gpt4");
    }

    #[test]
    fn test_default_upstream_name_prefers_override() {
        let mut model = sample_model();
        model.upstream_model_name = Some("gpt-4-1106-preview".to_string());
        assert_eq!(model.default_upstream_name(), "gpt-4-1106-preview");
    }
}
