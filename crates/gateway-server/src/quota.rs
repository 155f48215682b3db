//! Multi-window rate-limit enforcement: RPM (sliding window), TPM/TPH (fixed window),
//! TPD (shared daily usage hash field).
//!
//! Every dimension is keyed by the authenticated token id. A counter-store failure
//! during a pre-check is logged and treated as admit (fail-open); see the design note
//! on availability over strict enforcement.

use crate::error::ApiError;
use chrono::Utc;
use gateway_core::{GatewayError, Limit};
use gateway_migrations::{DeptBudgetRow, Repository};
use gateway_resilience::SharedCounterStore;
use std::time::Duration;
use uuid::Uuid;

const RPM_WINDOW_SECS: i64 = 60;
const RPM_TTL: Duration = Duration::from_secs(120);

/// Effective per-dimension limits after resolving token → dept → global.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveLimits {
    pub rpm: Limit,
    pub tpm: Limit,
    pub tph: Limit,
    pub tpd: Limit,
}

/// Per-token overrides, dept overrides, and global defaults feeding resolution.
pub struct QuotaInputs<'a> {
    pub token_id: Uuid,
    pub department: &'a str,
    pub token_rpm: Option<u64>,
    pub token_tpm: Option<u64>,
    pub token_tph: Option<u64>,
    pub token_tpd: Option<u64>,
}

/// Global-default and per-department rate limits, cached in-process for 60s.
pub struct QuotaGate {
    repository: std::sync::Arc<Repository>,
    counters: SharedCounterStore,
    defaults: gateway_config::RateLimitDefaults,
}

impl QuotaGate {
    /// Construct a gate over the persistent and fast stores.
    #[must_use]
    pub fn new(
        repository: std::sync::Arc<Repository>,
        counters: SharedCounterStore,
        defaults: gateway_config::RateLimitDefaults,
    ) -> Self {
        Self { repository, counters, defaults }
    }

    async fn dept_overrides(&self, department: &str) -> Option<DeptBudgetRow> {
        match self.repository.find_dept_budget(department).await {
            Ok(row) => row.filter(|d| d.enabled),
            Err(err) => {
                tracing::warn!(department, error = %err, "dept budget lookup failed, using global default");
                None
            }
        }
    }

    /// Resolve the effective limits for one request, per token → dept → global.
    pub async fn effective_limits(&self, inputs: &QuotaInputs<'_>) -> EffectiveLimits {
        let dept = self.dept_overrides(inputs.department).await;

        let resolve = |token: Option<u64>, dept_value: Option<i32>, default: u64| -> Limit {
            let scopes = [
                Limit::from_nullable(token),
                Limit::from_nullable(dept_value.map(|v| v.max(0) as u64)),
                Limit::Cap(default),
            ];
            Limit::resolve(&scopes).unwrap_or(Limit::Cap(default))
        };

        let dept_rpm = dept.as_ref().and_then(|d| d.requests_per_minute);
        let dept_tpm = dept.as_ref().and_then(|d| d.tokens_per_minute);
        let dept_tph = dept.as_ref().and_then(|d| d.tokens_per_hour);
        let dept_tpd = dept.as_ref().and_then(|d| d.tokens_per_day);

        EffectiveLimits {
            rpm: resolve(inputs.token_rpm, dept_rpm, self.defaults.rpm),
            tpm: resolve(inputs.token_tpm, dept_tpm, self.defaults.tpm),
            tph: resolve(inputs.token_tph, dept_tph, self.defaults.tph),
            tpd: resolve(inputs.token_tpd, dept_tpd, self.defaults.tpd),
        }
    }

    /// Enforce all four dimensions for `token_id`, admitting an RPM slot as a side
    /// effect of a passing check. Returns the first violated dimension as an error.
    ///
    /// # Errors
    /// Returns [`ApiError`] (429, `rate_limit_exceeded`) for the first exceeded
    /// dimension, in `rpm, tpm, tph, tpd` order.
    pub async fn check_and_admit(
        &self,
        token_id: Uuid,
        limits: &EffectiveLimits,
    ) -> Result<(), ApiError> {
        self.check_rpm(token_id, limits.rpm).await?;
        self.check_fixed_window(token_id, "tpm", limits.tpm, rl_tpm_key(token_id)).await?;
        self.check_fixed_window(token_id, "tph", limits.tph, rl_tph_key(token_id)).await?;
        self.check_tpd(token_id, limits.tpd).await?;
        Ok(())
    }

    async fn check_rpm(&self, token_id: Uuid, limit: Limit) -> Result<(), ApiError> {
        let key = rl_rpm_key(token_id);
        let now = Utc::now().timestamp();
        let window_start = (now - RPM_WINDOW_SECS) as f64;

        if let Err(err) = self.counters.zrem_by_score(&key, f64::MIN, window_start).await {
            tracing::warn!(error = %err, "rpm window eviction failed, failing open");
        }

        let count = match self.counters.zcard(&key).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(error = %err, "rpm count unavailable, failing open");
                self.admit_rpm(&key, now).await;
                return Ok(());
            }
        };

        if !limit.permits(count.max(0) as u64) {
            return Err(quota_exceeded("rpm", count.max(0) as u64, limit, 60));
        }

        self.admit_rpm(&key, now).await;
        Ok(())
    }

    async fn admit_rpm(&self, key: &str, now: i64) {
        let member = format!("{now}-{}", Uuid::new_v4());
        if let Err(err) = self.counters.zadd(key, &member, now as f64).await {
            tracing::warn!(error = %err, "rpm admit failed");
        }
        if let Err(err) = self.counters.expire(key, RPM_TTL).await {
            tracing::warn!(error = %err, "rpm ttl refresh failed");
        }
    }

    async fn check_fixed_window(
        &self,
        _token_id: Uuid,
        dimension: &'static str,
        limit: Limit,
        key: String,
    ) -> Result<(), ApiError> {
        if matches!(limit, Limit::Inherit | Limit::Unlimited) {
            return Ok(());
        }

        let used = match self.counters.get(&key).await {
            Ok(Some(value)) => value.parse::<u64>().unwrap_or(0),
            Ok(None) => 0,
            Err(err) => {
                tracing::warn!(error = %err, dimension, "fixed window counter unavailable, failing open");
                return Ok(());
            }
        };

        if !limit.permits(used) {
            let retry_after = if dimension == "tpm" { 60 } else { 600 };
            return Err(quota_exceeded(dimension, used, limit, retry_after));
        }
        Ok(())
    }

    async fn check_tpd(&self, token_id: Uuid, limit: Limit) -> Result<(), ApiError> {
        if matches!(limit, Limit::Inherit | Limit::Unlimited) {
            return Ok(());
        }

        let key = token_usage_key(token_id);
        let used = match self.counters.hgetall(&key).await {
            Ok(fields) => fields.get("outputTokens").copied().unwrap_or(0).max(0) as u64,
            Err(err) => {
                tracing::warn!(error = %err, "tpd counter unavailable, failing open");
                return Ok(());
            }
        };

        if !limit.permits(used) {
            return Err(quota_exceeded("tpd", used, limit, 3600));
        }
        Ok(())
    }

}

fn quota_exceeded(dimension: &'static str, used: u64, limit: Limit, retry_after: u64) -> ApiError {
    let limit_display = match limit {
        Limit::Cap(n) => n,
        _ => 0,
    };
    let err = GatewayError::RateLimited {
        dimension: dimension.to_string(),
        used,
        limit: limit_display,
        retry_after_secs: retry_after,
    };
    ApiError::from(err)
}

fn rl_rpm_key(token_id: Uuid) -> String {
    format!("rl:rpm:{token_id}")
}

fn rl_tpm_key(token_id: Uuid) -> String {
    let minute = Utc::now().format("%Y-%m-%dT%H:%M");
    format!("rl:tpm:{token_id}:{minute}")
}

fn rl_tph_key(token_id: Uuid) -> String {
    let hour = Utc::now().format("%Y-%m-%dT%H");
    format!("rl:tph:{token_id}:{hour}")
}

fn token_usage_key(token_id: Uuid) -> String {
    let day = Utc::now().format("%Y-%m-%d");
    format!("token_usage:{token_id}:{day}")
}
