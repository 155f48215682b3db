//! Post-response reconciliation: the usage log, daily stat upsert, fast counters, and
//! audit request log written after a request has been handled. Every effect here is
//! fire-and-forget: a failure is logged, never propagated to the client.

use chrono::Utc;
use gateway_migrations::{DailyUsageStatDelta, NewRequestLog, NewUsageLog, Repository};
use gateway_resilience::SharedCounterStore;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

const ACTIVE_USERS_TTL: Duration = Duration::from_secs(300);
const TPM_TTL: Duration = Duration::from_secs(120);
const TPH_TTL: Duration = Duration::from_secs(7200);
const MAX_REQUEST_BODY_BYTES: usize = 50_000;
const MAX_RESPONSE_BODY_BYTES: usize = 10_000;

/// Everything the recorder needs to describe one handled request.
pub struct ReconcileInput<'a> {
    pub request_id: String,
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub department: String,
    pub model: String,
    pub endpoint_url: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub latency_ms: i32,
    pub streamed: bool,
    pub outcome: &'static str,
    pub method: &'a str,
    pub path: &'a str,
    pub status_code: i32,
    pub request_body: Option<&'a Value>,
    pub response_body: Option<&'a Value>,
}

/// Writes the six reconciliation effects against the persistent and fast stores.
pub struct Recorder {
    repository: std::sync::Arc<Repository>,
    counters: SharedCounterStore,
}

impl Recorder {
    /// Construct a recorder over the persistent and fast stores.
    #[must_use]
    pub fn new(repository: std::sync::Arc<Repository>, counters: SharedCounterStore) -> Self {
        Self { repository, counters }
    }

    /// Run all six reconciliation effects for one handled request.
    pub async fn record(&self, input: &ReconcileInput<'_>) {
        self.record_usage_log(input).await;
        self.record_daily_stat(input).await;
        self.record_fast_counters(input).await;
        self.record_active_user(&input.user_id).await;
        self.record_rate_limit_windows(input).await;
        self.record_request_log(input).await;
    }

    async fn record_usage_log(&self, input: &ReconcileInput<'_>) {
        let entry = NewUsageLog {
            request_id: input.request_id.clone(),
            api_token_id: Some(input.token_id),
            user_id: Some(input.user_id),
            department: input.department.clone(),
            model: input.model.clone(),
            endpoint_url: input.endpoint_url.clone(),
            prompt_tokens: input.prompt_tokens,
            completion_tokens: input.completion_tokens,
            total_tokens: input.total_tokens,
            latency_ms: input.latency_ms,
            streamed: input.streamed,
            outcome: input.outcome.to_string(),
        };
        if let Err(err) = self.repository.insert_usage_log(&entry).await {
            tracing::warn!(error = %err, request_id = %input.request_id, "failed to insert usage log");
        }
    }

    async fn record_daily_stat(&self, input: &ReconcileInput<'_>) {
        let delta = DailyUsageStatDelta {
            scope_type: "user".to_string(),
            scope_id: input.user_id.to_string(),
            model: input.model.clone(),
            stat_date: Utc::now().date_naive(),
            prompt_tokens: input.prompt_tokens,
            completion_tokens: input.completion_tokens,
            total_tokens: input.total_tokens,
            is_error: input.outcome != "success",
        };
        if let Err(err) = self.repository.upsert_daily_usage_stat(&delta).await {
            tracing::warn!(error = %err, request_id = %input.request_id, "failed to upsert daily usage stat");
        }
    }

    async fn record_fast_counters(&self, input: &ReconcileInput<'_>) {
        let day_key = format!("token_usage:{}:{}", input.token_id, Utc::now().format("%Y-%m-%d"));
        if let Err(err) = self.counters.hincr_by(&day_key, "inputTokens", input.prompt_tokens).await {
            tracing::warn!(error = %err, "failed to increment token_usage.inputTokens");
        }
        if let Err(err) = self.counters.hincr_by(&day_key, "outputTokens", input.completion_tokens).await {
            tracing::warn!(error = %err, "failed to increment token_usage.outputTokens");
        }
        if let Err(err) = self.counters.hincr_by(&day_key, "requests", 1).await {
            tracing::warn!(error = %err, "failed to increment token_usage.requests");
        }

        if input.completion_tokens > 0 {
            let month = Utc::now().format("%Y-%m");
            for (kind, id) in [
                ("user", input.user_id.to_string()),
                ("token", input.token_id.to_string()),
                ("dept", input.department.clone()),
            ] {
                if id.is_empty() {
                    continue;
                }
                let key = format!("counters:month:{kind}:{id}:{month}");
                if let Err(err) = self.counters.incr_by(&key, input.completion_tokens).await {
                    tracing::warn!(error = %err, scope = kind, "failed to increment monthly counter");
                }
            }
        }
    }

    async fn record_active_user(&self, user_id: &Uuid) {
        let now = Utc::now().timestamp() as f64;
        let key = "active_users";
        let member = user_id.to_string();
        if let Err(err) = self.counters.zadd(key, &member, now).await {
            tracing::warn!(error = %err, "failed to record active user");
        }
        if let Err(err) = self.counters.expire(key, ACTIVE_USERS_TTL).await {
            tracing::warn!(error = %err, "failed to refresh active user set ttl");
        }
    }

    async fn record_rate_limit_windows(&self, input: &ReconcileInput<'_>) {
        if input.completion_tokens <= 0 {
            return;
        }
        let minute = Utc::now().format("%Y-%m-%dT%H:%M");
        let tpm_key = format!("rl:tpm:{}:{minute}", input.token_id);
        if let Err(err) = self.counters.incr_by(&tpm_key, input.completion_tokens).await {
            tracing::warn!(error = %err, "failed to increment rl:tpm");
        }
        if let Err(err) = self.counters.expire(&tpm_key, TPM_TTL).await {
            tracing::warn!(error = %err, "failed to refresh rl:tpm ttl");
        }

        let hour = Utc::now().format("%Y-%m-%dT%H");
        let tph_key = format!("rl:tph:{}:{hour}", input.token_id);
        if let Err(err) = self.counters.incr_by(&tph_key, input.completion_tokens).await {
            tracing::warn!(error = %err, "failed to increment rl:tph");
        }
        if let Err(err) = self.counters.expire(&tph_key, TPH_TTL).await {
            tracing::warn!(error = %err, "failed to refresh rl:tph ttl");
        }
    }

    async fn record_request_log(&self, input: &ReconcileInput<'_>) {
        let (request_body, request_truncated) = input
            .request_body
            .map(|body| redact_and_truncate(body, MAX_REQUEST_BODY_BYTES))
            .unwrap_or((None, false));
        let (response_body, response_truncated) = input
            .response_body
            .map(|body| redact_and_truncate(body, MAX_RESPONSE_BODY_BYTES))
            .unwrap_or((None, false));

        let entry = NewRequestLog {
            request_id: input.request_id.clone(),
            api_token_id: Some(input.token_id),
            method: input.method.to_string(),
            path: input.path.to_string(),
            status_code: input.status_code,
            request_body,
            response_body,
            error_message: None,
            truncated: request_truncated || response_truncated,
        };
        if let Err(err) = self.repository.insert_request_log(&entry).await {
            tracing::warn!(error = %err, request_id = %input.request_id, "failed to insert request log");
        }
    }
}

/// Replace inline base64 image data URIs with a `[BASE64_IMAGE:<N> chars]` marker, then
/// truncate the serialized body to `max_bytes`, flagging whether truncation occurred.
#[must_use]
pub fn redact_and_truncate(body: &Value, max_bytes: usize) -> (Option<Value>, bool) {
    let redacted = redact_images(body.clone());
    let serialized = serde_json::to_string(&redacted).unwrap_or_default();
    if serialized.len() <= max_bytes {
        return (Some(redacted), false);
    }

    let truncated: String = serialized.chars().take(max_bytes).collect();
    (Some(Value::String(truncated)), true)
}

fn redact_images(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_image_string(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_images).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(key, value)| (key, redact_images(value))).collect())
        }
        other => other,
    }
}

fn redact_image_string(s: &str) -> String {
    if let Some(rest) = s.strip_prefix("data:image/") {
        if let Some(comma) = rest.find(',') {
            let data = &rest[comma + 1..];
            return format!("[BASE64_IMAGE:{} chars]", data.len());
        }
    }
    s.to_string()
}
