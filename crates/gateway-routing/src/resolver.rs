//! Model resolution: identifier lookup plus endpoint-list construction.

use crate::model::{ModelRecord, ModelRepository, SubModelRecord};
use gateway_core::{ApiKey, Endpoint, GatewayError, ProviderId};
use std::sync::Arc;

/// A resolved model together with its ordered, enabled endpoint list.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    /// The matched model row.
    pub model: ModelRecord,
    /// `[primary, ...enabled sub-models sorted by sort_order]`. Non-empty whenever the
    /// model itself is enabled, since the primary endpoint is always present.
    pub endpoints: Vec<Endpoint>,
}

/// Resolves a caller-supplied model identifier to a model and its endpoint list,
/// enforcing the token's `allowedModels` restriction.
pub struct ModelResolver<R> {
    repository: Arc<R>,
}

impl<R: ModelRepository> ModelResolver<R> {
    /// Construct a resolver over `repository`.
    #[must_use]
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Resolve `identifier` to a model and endpoint list.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] if no enabled model matches, or
    /// [`GatewayError::Permission`] if `allowed_models` is non-empty and excludes the
    /// resolved model.
    pub async fn resolve(
        &self,
        identifier: &str,
        allowed_models: &[String],
    ) -> Result<ResolvedModel, GatewayError> {
        let model = self
            .repository
            .find_enabled_model(identifier)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("model '{identifier}' not found")))?;

        if !allowed_models.is_empty() && !allowed_models.contains(&model.id) {
            return Err(GatewayError::Permission(format!(
                "model '{}' is not permitted for this token",
                model.id
            )));
        }

        let mut sub_models = self.repository.find_enabled_sub_models(&model.id).await?;
        sub_models.retain(SubModelRecord::is_enabled);
        sub_models.sort_by_key(|s| s.sort_order);

        let endpoints = build_endpoint_list(&model, &sub_models);

        Ok(ResolvedModel { model, endpoints })
    }
}

impl SubModelRecord {
    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

fn build_endpoint_list(model: &ModelRecord, sub_models: &[SubModelRecord]) -> Vec<Endpoint> {
    let default_name = model.default_upstream_name();

    let mut primary = Endpoint::new(
        ProviderId::new(model.id.clone()),
        model.endpoint_url.clone(),
        default_name.clone(),
    )
    .with_extra_headers(model.extra_headers.clone());
    if let Some(key) = &model.api_key {
        primary = primary.with_api_key(ApiKey::new(key.clone()));
    }

    let mut endpoints = Vec::with_capacity(1 + sub_models.len());
    endpoints.push(primary);

    for (index, sub) in sub_models.iter().enumerate() {
        let name = sub.model_name.clone().unwrap_or_else(|| default_name.clone());
        let id = ProviderId::new(format!("{}#{index}", model.id));
        let mut endpoint =
            Endpoint::new(id, sub.endpoint_url.clone(), name).with_extra_headers(sub.extra_headers.clone());
        if let Some(key) = &sub.api_key {
            endpoint = endpoint.with_api_key(ApiKey::new(key.clone()));
        }
        endpoints.push(endpoint);
    }

    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixtureRepository {
        model: Option<ModelRecord>,
        sub_models: Vec<SubModelRecord>,
    }

    #[async_trait::async_trait]
    impl ModelRepository for FixtureRepository {
        async fn find_enabled_model(&self, identifier: &str) -> Result<Option<ModelRecord>, GatewayError> {
            Ok(self
                .model
                .as_ref()
                .filter(|m| m.matches(identifier))
                .cloned())
        }

        async fn find_enabled_sub_models(
            &self,
            _parent_model_id: &str,
        ) -> Result<Vec<SubModelRecord>, GatewayError> {
            Ok(self.sub_models.clone())
        }
    }

    fn model() -> ModelRecord {
        ModelRecord {
            id: "m1".to_string(),
            name: "gpt4".to_string(),
            alias: None,
            enabled: true,
            endpoint_url: "https://primary.example/v1".to_string(),
            api_key: Some("sk-primary".to_string()),
            extra_headers: HashMap::new(),
            upstream_model_name: None,
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_model_returns_not_found() {
        let repository = Arc::new(FixtureRepository {
            model: None,
            sub_models: vec![],
        });
        let resolver = ModelResolver::new(repository);
        let err = resolver.resolve("missing", &[]).await.expect_err("not found");
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_denies_model_outside_allowed_list() {
        let repository = Arc::new(FixtureRepository {
            model: Some(model()),
            sub_models: vec![],
        });
        let resolver = ModelResolver::new(repository);
        let err = resolver
            .resolve("gpt4", &["other-model".to_string()])
            .await
            .expect_err("permission denied");
        assert!(matches!(err, GatewayError::Permission(_)));
    }

    #[tokio::test]
    async fn test_resolve_builds_primary_then_sorted_sub_models() {
        let repository = Arc::new(FixtureRepository {
            model: Some(model()),
            sub_models: vec![
                SubModelRecord {
                    parent_model_id: "m1".to_string(),
                    sort_order: 2,
                    enabled: true,
                    endpoint_url: "https://c.example/v1".to_string(),
                    api_key: None,
                    extra_headers: HashMap::new(),
                    model_name: None,
                },
                SubModelRecord {
                    parent_model_id: "m1".to_string(),
                    sort_order: 1,
                    enabled: true,
                    endpoint_url: "https://b.example/v1".to_string(),
                    api_key: None,
                    extra_headers: HashMap::new(),
                    model_name: Some("gpt4-b".to_string()),
                },
                SubModelRecord {
                    parent_model_id: "m1".to_string(),
                    sort_order: 0,
                    enabled: false,
                    endpoint_url: "https://disabled.example/v1".to_string(),
                    api_key: None,
                    extra_headers: HashMap::new(),
                    model_name: None,
                },
            ],
        });
        let resolver = ModelResolver::new(repository);
        let resolved = resolver.resolve("gpt4", &[]).await.expect("resolve");

        assert_eq!(resolved.endpoints.len(), 3);
        assert_eq!(resolved.endpoints[0].url, "https://primary.example/v1");
        assert_eq!(resolved.endpoints[1].url, "https://b.example/v1");
        assert_eq!(resolved.endpoints[1].model_name, "gpt4-b");
        assert_eq!(resolved.endpoints[2].url, "https://c.example/v1");
        assert_eq!(resolved.endpoints[2].model_name, "gpt4");
    }
}
