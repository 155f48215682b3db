//! Adapts [`gateway_migrations::Repository`] rows to the domain traits the request
//! pipeline depends on, keeping the persistence crate itself free of upward
//! dependencies on `gateway-core`/`gateway-routing`.

use async_trait::async_trait;
use gateway_core::GatewayError;
use gateway_migrations::Repository;
use gateway_routing::{ModelRecord, ModelRepository, SubModelRecord};
use std::sync::Arc;

/// [`ModelRepository`] backed by the persistent store.
pub struct PersistentModelRepository {
    repository: Arc<Repository>,
}

impl PersistentModelRepository {
    /// Construct an adapter over an existing repository.
    #[must_use]
    pub fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl ModelRepository for PersistentModelRepository {
    async fn find_enabled_model(&self, identifier: &str) -> Result<Option<ModelRecord>, GatewayError> {
        let row = self
            .repository
            .find_model_by_identifier(identifier)
            .await
            .map_err(|e| GatewayError::internal(e.to_string()))?;

        Ok(row.map(|row| ModelRecord {
            id: row.id.to_string(),
            name: row.name,
            alias: row.alias,
            enabled: row.enabled,
            endpoint_url: row.endpoint_url,
            api_key: row.api_key_encrypted,
            extra_headers: row.extra_headers,
            upstream_model_name: row.upstream_model_name,
            max_tokens: row.max_tokens.map(|v| v.max(0) as u32),
        }))
    }

    async fn find_enabled_sub_models(
        &self,
        parent_model_id: &str,
    ) -> Result<Vec<SubModelRecord>, GatewayError> {
        let parent_id = uuid::Uuid::parse_str(parent_model_id)
            .map_err(|e| GatewayError::internal(format!("invalid model id: {e}")))?;

        let rows = self
            .repository
            .find_enabled_sub_models(parent_id)
            .await
            .map_err(|e| GatewayError::internal(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| SubModelRecord {
                parent_model_id: row.parent_model_id.to_string(),
                sort_order: row.sort_order,
                enabled: row.enabled,
                endpoint_url: row.endpoint_url,
                api_key: row.api_key_encrypted,
                extra_headers: row.extra_headers,
                model_name: row.model_name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_tokens_negative_db_value_clamps_to_zero() {
        // Defensive: a corrupt row should never underflow the u32 cast.
        let value: Option<i32> = Some(-1);
        assert_eq!(value.map(|v| v.max(0) as u32), Some(0));
    }
}
