//! Narrow async repository methods over the persistent store.
//!
//! These are plain reads/writes against the tables defined in [`crate::schema`],
//! returning domain rows rather than raw [`sqlx::Row`]s. Higher-level crates adapt
//! these rows to their own domain types instead of talking to `sqlx` directly.

use crate::error::{MigrationError, Result};
use crate::pool::DatabasePool;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

/// A row from `api_tokens`, joined with its owning user's department.
#[derive(Debug, Clone)]
pub struct TokenRow {
    /// Token id.
    pub id: Uuid,
    /// Owning user id.
    pub user_id: Uuid,
    /// Department the owning user belongs to.
    pub department: String,
    /// Whether the token is enabled.
    pub enabled: bool,
    /// Whether the token has been banned.
    pub banned: bool,
    /// Model identifiers this token may use; empty means no restriction.
    pub allowed_models: Vec<String>,
    /// Per-token rate limit overrides; `None` inherits the department/global default.
    pub rate_limit_rpm: Option<i32>,
    pub rate_limit_tpm: Option<i32>,
    pub rate_limit_tph: Option<i32>,
    pub rate_limit_tpd: Option<i32>,
    /// Monthly output-token budget; `None` inherits, `Some(0)` means unlimited.
    pub monthly_budget_tokens: Option<i64>,
    /// Owning user's monthly output-token budget; `None` inherits, `Some(0)` means unlimited.
    pub user_monthly_budget_tokens: Option<i64>,
    /// Expiry, if any.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A row from `models`.
#[derive(Debug, Clone)]
pub struct ModelRow {
    pub id: Uuid,
    pub name: String,
    pub alias: Option<String>,
    pub enabled: bool,
    pub endpoint_url: String,
    pub api_key_encrypted: Option<String>,
    pub extra_headers: HashMap<String, String>,
    pub upstream_model_name: Option<String>,
    pub max_tokens: Option<i32>,
}

/// A row from `sub_models`.
#[derive(Debug, Clone)]
pub struct SubModelRow {
    pub parent_model_id: Uuid,
    pub sort_order: i32,
    pub enabled: bool,
    pub endpoint_url: String,
    pub api_key_encrypted: Option<String>,
    pub extra_headers: HashMap<String, String>,
    pub model_name: Option<String>,
}

/// A row from `dept_budgets`: a department's monthly output-token budget and its
/// rate-limit overrides, gated behind the single `enabled` flag.
#[derive(Debug, Clone)]
pub struct DeptBudgetRow {
    pub department: String,
    pub monthly_budget_tokens: Option<i64>,
    pub requests_per_minute: Option<i32>,
    pub tokens_per_minute: Option<i32>,
    pub tokens_per_hour: Option<i32>,
    pub tokens_per_day: Option<i32>,
    pub enabled: bool,
}

/// A completed request, ready to be recorded in `usage_logs`.
#[derive(Debug, Clone)]
pub struct NewUsageLog {
    pub request_id: String,
    pub api_token_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub department: String,
    pub model: String,
    pub endpoint_url: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub latency_ms: i32,
    pub streamed: bool,
    pub outcome: String,
}

/// The delta to fold into a `daily_usage_stats` row for one `(scope, model, date)`.
#[derive(Debug, Clone)]
pub struct DailyUsageStatDelta {
    pub scope_type: String,
    pub scope_id: String,
    pub model: String,
    pub stat_date: chrono::NaiveDate,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub is_error: bool,
}

/// A request/response log entry, already redacted and truncated.
#[derive(Debug, Clone)]
pub struct NewRequestLog {
    pub request_id: String,
    pub api_token_id: Option<Uuid>,
    pub method: String,
    pub path: String,
    pub status_code: i32,
    pub request_body: Option<serde_json::Value>,
    pub response_body: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub truncated: bool,
}

/// A circuit-breaker snapshot to persist for admin/dashboard visibility.
#[derive(Debug, Clone)]
pub struct EndpointHealthSnapshot {
    pub endpoint_url: String,
    pub status: String,
    pub consecutive_failures: i32,
    pub open_until: Option<DateTime<Utc>>,
}

fn parse_headers(value: Option<serde_json::Value>) -> HashMap<String, String> {
    value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn parse_allowed_models(values: Option<Vec<String>>) -> Vec<String> {
    values.unwrap_or_default()
}

/// Repository over the tables `gateway-server`'s request pipeline reads and writes.
pub struct Repository {
    pool: std::sync::Arc<DatabasePool>,
}

impl Repository {
    /// Construct a repository over an existing pool.
    #[must_use]
    pub fn new(pool: std::sync::Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    /// Find an enabled, unbanned token by its key hash, joined with the owning user's
    /// department.
    pub async fn find_token_by_hash(&self, key_hash: &str) -> Result<Option<TokenRow>> {
        let row = sqlx::query(
            r#"
            SELECT t.id, t.user_id, u.department, t.enabled, t.banned, t.allowed_models,
                   t.rate_limit_rpm, t.rate_limit_tpm, t.rate_limit_tph, t.rate_limit_tpd,
                   t.monthly_budget_tokens, u.monthly_budget_tokens AS user_monthly_budget_tokens,
                   t.expires_at
            FROM api_tokens t
            JOIN users u ON u.id = t.user_id
            WHERE t.key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(self.pool.inner())
        .await
        .map_err(|e| MigrationError::Execution(e.to_string()))?;

        Ok(row.map(|row| TokenRow {
            id: row.get("id"),
            user_id: row.get("user_id"),
            department: row.get("department"),
            enabled: row.get("enabled"),
            banned: row.get("banned"),
            allowed_models: parse_allowed_models(row.try_get("allowed_models").ok()),
            rate_limit_rpm: row.get("rate_limit_rpm"),
            rate_limit_tpm: row.get("rate_limit_tpm"),
            rate_limit_tph: row.get("rate_limit_tph"),
            rate_limit_tpd: row.get("rate_limit_tpd"),
            monthly_budget_tokens: row.get("monthly_budget_tokens"),
            user_monthly_budget_tokens: row.get("user_monthly_budget_tokens"),
            expires_at: row.get("expires_at"),
        }))
    }

    /// Best-effort update of a token's `last_used_at`. Callers should not fail the
    /// request when this errors; it is accounting, not authorization.
    pub async fn touch_last_used(&self, token_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE api_tokens SET last_used_at = NOW() WHERE id = $1")
            .bind(token_id)
            .execute(self.pool.inner())
            .await
            .map_err(|e| MigrationError::Execution(e.to_string()))?;
        Ok(())
    }

    /// Find an enabled model by id, name, or alias.
    pub async fn find_model_by_identifier(&self, identifier: &str) -> Result<Option<ModelRow>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, alias, enabled, endpoint_url, api_key_encrypted,
                   extra_headers, upstream_model_name, max_tokens
            FROM models
            WHERE enabled = TRUE AND (id::text = $1 OR name = $1 OR alias = $1)
            "#,
        )
        .bind(identifier)
        .fetch_optional(self.pool.inner())
        .await
        .map_err(|e| MigrationError::Execution(e.to_string()))?;

        Ok(row.map(|row| ModelRow {
            id: row.get("id"),
            name: row.get("name"),
            alias: row.get("alias"),
            enabled: row.get("enabled"),
            endpoint_url: row.get("endpoint_url"),
            api_key_encrypted: row.get("api_key_encrypted"),
            extra_headers: parse_headers(row.try_get("extra_headers").ok()),
            upstream_model_name: row.get("upstream_model_name"),
            max_tokens: row.get("max_tokens"),
        }))
    }

    /// List every enabled model, for `GET /v1/models`.
    pub async fn list_enabled_models(&self) -> Result<Vec<ModelRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, alias, enabled, endpoint_url, api_key_encrypted,
                   extra_headers, upstream_model_name, max_tokens
            FROM models
            WHERE enabled = TRUE
            ORDER BY name
            "#,
        )
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| MigrationError::Execution(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| ModelRow {
                id: row.get("id"),
                name: row.get("name"),
                alias: row.get("alias"),
                enabled: row.get("enabled"),
                endpoint_url: row.get("endpoint_url"),
                api_key_encrypted: row.get("api_key_encrypted"),
                extra_headers: parse_headers(row.try_get("extra_headers").ok()),
                upstream_model_name: row.get("upstream_model_name"),
                max_tokens: row.get("max_tokens"),
            })
            .collect())
    }

    /// Find the enabled sub-models for a parent model, unordered.
    pub async fn find_enabled_sub_models(&self, parent_model_id: Uuid) -> Result<Vec<SubModelRow>> {
        let rows = sqlx::query(
            r#"
            SELECT parent_model_id, sort_order, enabled, endpoint_url, api_key_encrypted,
                   extra_headers, model_name
            FROM sub_models
            WHERE parent_model_id = $1 AND enabled = TRUE
            "#,
        )
        .bind(parent_model_id)
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| MigrationError::Execution(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| SubModelRow {
                parent_model_id: row.get("parent_model_id"),
                sort_order: row.get("sort_order"),
                enabled: row.get("enabled"),
                endpoint_url: row.get("endpoint_url"),
                api_key_encrypted: row.get("api_key_encrypted"),
                extra_headers: parse_headers(row.try_get("extra_headers").ok()),
                model_name: row.get("model_name"),
            })
            .collect())
    }

    /// Find a department's budget and rate-limit override row, regardless of its
    /// `enabled` flag; callers decide whether to honor a disabled row.
    pub async fn find_dept_budget(&self, department: &str) -> Result<Option<DeptBudgetRow>> {
        let row = sqlx::query(
            r#"
            SELECT department, monthly_budget_tokens, requests_per_minute, tokens_per_minute,
                   tokens_per_hour, tokens_per_day, enabled
            FROM dept_budgets
            WHERE department = $1
            "#,
        )
        .bind(department)
        .fetch_optional(self.pool.inner())
        .await
        .map_err(|e| MigrationError::Execution(e.to_string()))?;

        Ok(row.map(|row| DeptBudgetRow {
            department: row.get("department"),
            monthly_budget_tokens: row.get("monthly_budget_tokens"),
            requests_per_minute: row.get("requests_per_minute"),
            tokens_per_minute: row.get("tokens_per_minute"),
            tokens_per_hour: row.get("tokens_per_hour"),
            tokens_per_day: row.get("tokens_per_day"),
            enabled: row.get("enabled"),
        }))
    }

    /// Insert one `usage_logs` row for a completed request.
    pub async fn insert_usage_log(&self, entry: &NewUsageLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_logs
                (request_id, api_token_id, user_id, department, model, endpoint_url,
                 prompt_tokens, completion_tokens, total_tokens, latency_ms, streamed, outcome)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&entry.request_id)
        .bind(entry.api_token_id)
        .bind(entry.user_id)
        .bind(&entry.department)
        .bind(&entry.model)
        .bind(&entry.endpoint_url)
        .bind(entry.prompt_tokens)
        .bind(entry.completion_tokens)
        .bind(entry.total_tokens)
        .bind(entry.latency_ms)
        .bind(entry.streamed)
        .bind(&entry.outcome)
        .execute(self.pool.inner())
        .await
        .map_err(|e| MigrationError::Execution(e.to_string()))?;
        Ok(())
    }

    /// Upsert a `daily_usage_stats` row, accumulating `delta` into any existing row for
    /// the same `(scope_type, scope_id, model, stat_date)`.
    pub async fn upsert_daily_usage_stat(&self, delta: &DailyUsageStatDelta) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_usage_stats
                (scope_type, scope_id, model, stat_date, request_count,
                 prompt_tokens, completion_tokens, total_tokens, error_count)
            VALUES ($1, $2, $3, $4, 1, $5, $6, $7, $8)
            ON CONFLICT (scope_type, scope_id, model, stat_date) DO UPDATE SET
                request_count = daily_usage_stats.request_count + 1,
                prompt_tokens = daily_usage_stats.prompt_tokens + EXCLUDED.prompt_tokens,
                completion_tokens = daily_usage_stats.completion_tokens + EXCLUDED.completion_tokens,
                total_tokens = daily_usage_stats.total_tokens + EXCLUDED.total_tokens,
                error_count = daily_usage_stats.error_count + EXCLUDED.error_count
            "#,
        )
        .bind(&delta.scope_type)
        .bind(&delta.scope_id)
        .bind(&delta.model)
        .bind(delta.stat_date)
        .bind(delta.prompt_tokens)
        .bind(delta.completion_tokens)
        .bind(delta.total_tokens)
        .bind(i64::from(delta.is_error))
        .execute(self.pool.inner())
        .await
        .map_err(|e| MigrationError::Execution(e.to_string()))?;
        Ok(())
    }

    /// Insert one `request_logs` row.
    pub async fn insert_request_log(&self, entry: &NewRequestLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO request_logs
                (request_id, api_token_id, method, path, status_code,
                 request_body, response_body, error_message, truncated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&entry.request_id)
        .bind(entry.api_token_id)
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(entry.status_code)
        .bind(&entry.request_body)
        .bind(&entry.response_body)
        .bind(&entry.error_message)
        .bind(entry.truncated)
        .execute(self.pool.inner())
        .await
        .map_err(|e| MigrationError::Execution(e.to_string()))?;
        Ok(())
    }

    /// Upsert an `endpoint_health` snapshot, keyed by `endpoint_url`.
    pub async fn upsert_endpoint_health(&self, snapshot: &EndpointHealthSnapshot) -> Result<()> {
        let now_field = if snapshot.consecutive_failures == 0 {
            "last_success_at"
        } else {
            "last_failure_at"
        };
        let sql = format!(
            r#"
            INSERT INTO endpoint_health (endpoint_url, status, consecutive_failures, open_until, {now_field})
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (endpoint_url) DO UPDATE SET
                status = EXCLUDED.status,
                consecutive_failures = EXCLUDED.consecutive_failures,
                open_until = EXCLUDED.open_until,
                {now_field} = NOW()
            "#
        );
        sqlx::query(&sql)
            .bind(&snapshot.endpoint_url)
            .bind(&snapshot.status)
            .bind(snapshot.consecutive_failures)
            .bind(snapshot.open_until)
            .execute(self.pool.inner())
            .await
            .map_err(|e| MigrationError::Execution(e.to_string()))?;
        Ok(())
    }
}
