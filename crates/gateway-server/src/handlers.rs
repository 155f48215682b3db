//! HTTP request handlers for the gateway API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use gateway_core::{GatewayError, GatewayRequest, ModelObject, ModelsResponse, Usage};
use serde::Serialize;
use serde_json::Value;
use std::{convert::Infallible, time::Instant};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::AuthenticatedEntity,
    error::ApiError,
    extractors::{JsonBody, RequestId},
    forwarder::{self, ForwardResult},
    quota::QuotaInputs,
    reconcile::ReconcileInput,
    state::AppState,
};

/// `GET /v1/health` response shape: `{status, timestamp}`. 503 if either store is
/// unreachable.
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    status: String,
    timestamp: String,
}

/// `GET /v1/health` — pings both the persistent store and the fast counter store.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let persistent_ok = state.repository.find_dept_budget("__healthcheck__").await.is_ok();
    let fast_ok = state.counters.get("__healthcheck__").await.is_ok();

    let status = if persistent_ok && fast_ok { "ok" } else { "degraded" };
    let code = if persistent_ok && fast_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        code,
        Json(HealthCheckResponse { status: status.to_string(), timestamp: Utc::now().to_rfc3339() }),
    )
}

/// `GET /live` — liveness probe, always cheap, never touches external stores.
pub async fn liveness_check(State(state): State<AppState>) -> Json<crate::health::LivenessResponse> {
    Json(state.health.check_liveness())
}

/// `GET /metrics` — Prometheus text exposition of the gateway's request counters.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rendered = state
        .metrics
        .render()
        .map_err(|e| ApiError::from(GatewayError::Internal(format!("failed to render metrics: {e}"))))?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        rendered,
    ))
}

/// `GET /ready` — readiness probe; ready only once both stores answer.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let persistent_ok = state.repository.find_dept_budget("__healthcheck__").await.is_ok();
    let fast_ok = state.counters.get("__healthcheck__").await.is_ok();
    let healthy = usize::from(persistent_ok) + usize::from(fast_ok);

    let response = state.health.check_readiness(2, healthy).await;
    let code = if response.ready && healthy == 2 { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(response))
}

/// `GET /v1/models` — lists enabled models, filtered by the caller's `allowedModels`.
#[instrument(skip(state, entity))]
pub async fn list_models(
    State(state): State<AppState>,
    Extension(entity): Extension<AuthenticatedEntity>,
) -> Result<Json<ModelsResponse>, ApiError> {
    let rows = state.repository.list_enabled_models().await.map_err(|e| {
        ApiError::from(GatewayError::Internal(format!("failed to list models: {e}")))
    })?;

    let data = rows
        .into_iter()
        .filter(|row| entity.may_use_model(&row.id.to_string()) || entity.may_use_model(&row.name))
        .map(|row| ModelObject {
            id: row.alias.unwrap_or(row.name),
            object: "model".to_string(),
            created: 0,
            owned_by: "system".to_string(),
        })
        .collect();

    Ok(Json(ModelsResponse { object: "list".to_string(), data }))
}

/// `GET /v1/models/:name` — fetch one model, filtered by `allowedModels`.
#[instrument(skip(state, entity))]
pub async fn get_model(
    State(state): State<AppState>,
    Extension(entity): Extension<AuthenticatedEntity>,
    Path(model_id): Path<String>,
) -> Result<Json<ModelObject>, ApiError> {
    if !entity.may_use_model(&model_id) {
        return Err(ApiError::from(GatewayError::Permission(format!(
            "model '{model_id}' is not permitted for this token"
        ))));
    }

    let row = state
        .repository
        .find_model_by_identifier(&model_id)
        .await
        .map_err(|e| ApiError::from(GatewayError::Internal(format!("model lookup failed: {e}"))))?
        .ok_or_else(|| ApiError::from(GatewayError::NotFound(format!("model '{model_id}' not found"))))?;

    Ok(Json(ModelObject {
        id: row.alias.unwrap_or(row.name),
        object: "model".to_string(),
        created: 0,
        owned_by: "system".to_string(),
    }))
}

/// `POST /v1/completions` — legacy completions endpoint, intentionally unimplemented.
pub async fn completions() -> ApiError {
    ApiError::from(GatewayError::NotImplemented("legacy completions endpoint is not supported".to_string()))
}

/// `POST /v1/chat/completions` — the data-plane pipeline: quota → budget → resolve →
/// select → forward → reconcile.
#[instrument(skip(state, entity, body), fields(model = %body.get("model").and_then(Value::as_str).unwrap_or_default()))]
pub async fn chat_completion(
    State(state): State<AppState>,
    Extension(entity): Extension<AuthenticatedEntity>,
    RequestId(request_id): RequestId,
    JsonBody(body): JsonBody<Value>,
) -> Result<Response, ApiError> {
    // `GatewayRequest` is used only to validate the shape; the raw `Value` is what
    // actually gets forwarded, so fields it doesn't enumerate (e.g.
    // `max_completion_tokens`) survive to the upstream request.
    let typed: GatewayRequest = serde_json::from_value(body.clone()).map_err(|e| {
        ApiError::from(GatewayError::validation(format!("invalid request body: {e}"), None, "invalid_body"))
    })?;
    typed.validate().map_err(ApiError::from)?;

    if !entity.may_use_model(&typed.model) {
        return Err(ApiError::from(GatewayError::Permission(format!(
            "model '{}' is not permitted for this token",
            typed.model
        ))));
    }

    let limits = state
        .quota
        .effective_limits(&QuotaInputs {
            token_id: entity.token_id,
            department: &entity.department,
            token_rpm: entity.rate_limit_rpm,
            token_tpm: entity.rate_limit_tpm,
            token_tph: entity.rate_limit_tph,
            token_tpd: entity.rate_limit_tpd,
        })
        .await;
    state.quota.check_and_admit(entity.token_id, &limits).await?;

    state
        .budget
        .check(&entity.department, entity.user_id, entity.token_id, entity.user_monthly_budget_tokens, entity.monthly_budget_tokens)
        .await?;

    let resolved = state
        .model_resolver
        .resolve(&typed.model, &entity.allowed_models)
        .await
        .map_err(ApiError::from)?;

    let endpoints = state.endpoint_selector.order(&resolved.model.id, &resolved.endpoints).await;
    if endpoints.is_empty() {
        return Err(ApiError::from(GatewayError::ServiceUnavailable(format!(
            "no healthy endpoints available for model '{}'",
            typed.model
        ))));
    }

    let request_body = body;
    let start = Instant::now();

    if typed.stream {
        handle_streaming_request(state, entity, request_id, request_body, endpoints).await
    } else {
        handle_non_streaming_request(state, entity, request_id, request_body, endpoints, start).await
    }
}

async fn handle_non_streaming_request(
    state: AppState,
    entity: AuthenticatedEntity,
    request_id: String,
    request_body: Value,
    endpoints: Vec<gateway_core::Endpoint>,
    start: Instant,
) -> Result<Response, ApiError> {
    let outcome = forwarder::forward_unary(
        &state.http_client,
        &endpoints,
        "/chat/completions",
        &request_body,
        &state.endpoint_selector,
    )
    .await;

    let latency_ms = start.elapsed().as_millis() as i32;

    let ForwardResult { status, body, usage, endpoint_url } = match outcome {
        Ok(result) => result,
        Err(message) => {
            error!(request_id = %request_id, error = %message, "all endpoints exhausted");
            return Err(ApiError::from(GatewayError::ServiceUnavailable(message)));
        }
    };

    let status_code = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let outcome_label = if status_code.is_success() { "success" } else { "client_error" };

    record_reconciliation(
        &state,
        &entity,
        &request_id,
        &request_body,
        &body,
        &endpoint_url,
        usage,
        latency_ms,
        false,
        outcome_label,
        "POST",
        "/v1/chat/completions",
        status_code.as_u16() as i32,
    )
    .await;

    info!(request_id = %request_id, status = %status_code, latency_ms, "chat completion handled");

    Ok((status_code, [(axum::http::header::CONTENT_TYPE, "application/json")], body).into_response())
}

async fn handle_streaming_request(
    state: AppState,
    entity: AuthenticatedEntity,
    request_id: String,
    request_body: Value,
    endpoints: Vec<gateway_core::Endpoint>,
) -> Result<Response, ApiError> {
    let body_with_usage = forwarder::with_stream_options_usage(request_body.clone());

    let mut last_error = "no endpoints available".to_string();
    let mut chosen: Option<(gateway_core::Endpoint, reqwest::Response)> = None;

    for endpoint in &endpoints {
        let translated = forwarder::translate_body(body_with_usage.clone(), &endpoint.model_name);
        let url = forwarder::normalize_url(&endpoint.url, "/chat/completions");
        let mut request = state.http_client.post(&url).timeout(forwarder::DEADLINE).json(&translated);
        request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(api_key) = &endpoint.api_key {
            request = request.bearer_auth(api_key.expose());
        }
        for (key, value) in &endpoint.extra_headers {
            if key.eq_ignore_ascii_case("content-type") || key.eq_ignore_ascii_case("authorization") {
                continue;
            }
            request = request.header(key, value);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                state.endpoint_selector.record_success(&endpoint.url).await;
                chosen = Some((endpoint.clone(), response));
                break;
            }
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() {
                    state.endpoint_selector.record_failure(&endpoint.url).await;
                    state.metrics.record_upstream_failure(&endpoint.url);
                    last_error = format!("upstream returned {status}");
                    continue;
                }

                let body = response.bytes().await.unwrap_or_default();

                if let forwarder::Outcome::RecoverableContextWindow { .. } =
                    forwarder::classify(status, &body, &translated)
                {
                    let retry_body = forwarder::without_max_tokens_fields(translated.clone());
                    let mut retry = state.http_client.post(&url).timeout(forwarder::DEADLINE).json(&retry_body);
                    retry = retry.header(reqwest::header::CONTENT_TYPE, "application/json");
                    if let Some(api_key) = &endpoint.api_key {
                        retry = retry.bearer_auth(api_key.expose());
                    }
                    for (key, value) in &endpoint.extra_headers {
                        if key.eq_ignore_ascii_case("content-type") || key.eq_ignore_ascii_case("authorization") {
                            continue;
                        }
                        retry = retry.header(key, value);
                    }

                    match retry.send().await {
                        Ok(retry_response) if retry_response.status().is_success() => {
                            state.endpoint_selector.record_success(&endpoint.url).await;
                            chosen = Some((endpoint.clone(), retry_response));
                            break;
                        }
                        Ok(retry_response) => {
                            let retry_status = retry_response.status();
                            let retry_body = retry_response.bytes().await.unwrap_or_default();
                            return Ok((
                                StatusCode::from_u16(retry_status.as_u16()).unwrap_or(StatusCode::BAD_REQUEST),
                                [(axum::http::header::CONTENT_TYPE, "application/json")],
                                retry_body,
                            )
                                .into_response());
                        }
                        Err(err) => {
                            state.endpoint_selector.record_failure(&endpoint.url).await;
                            state.metrics.record_upstream_failure(&endpoint.url);
                            return Err(ApiError::from(GatewayError::ServiceUnavailable(err.to_string())));
                        }
                    }
                }

                return Ok((
                    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_REQUEST),
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    body,
                )
                    .into_response());
            }
            Err(err) => {
                state.endpoint_selector.record_failure(&endpoint.url).await;
                state.metrics.record_upstream_failure(&endpoint.url);
                last_error = err.to_string();
            }
        }
    }

    let Some((endpoint, response)) = chosen else {
        error!(request_id = %request_id, error = %last_error, "all endpoints exhausted for stream");
        return Err(ApiError::from(GatewayError::ServiceUnavailable(last_error)));
    };

    let endpoint_url = endpoint.url.clone();
    let start = Instant::now();
    let mut upstream = response.bytes_stream();

    let sse_stream = async_stream::stream! {
        let _stream_guard = state.metrics.track_stream();
        let mut buffer = String::new();
        let mut accumulator = gateway_core::UsageAccumulator::new();
        let mut done = false;

        'outer: loop {
            for line in forwarder::drain_complete_lines(&mut buffer) {
                if let Some(event) = forwarder::process_sse_line(&line, &mut accumulator) {
                    let payload = match event {
                        forwarder::SseEvent::Data(payload) => {
                            if payload == "[DONE]" {
                                done = true;
                            }
                            payload
                        }
                        forwarder::SseEvent::Raw(raw) => raw,
                    };
                    yield Ok::<_, Infallible>(Event::default().data(payload));
                    if done {
                        break 'outer;
                    }
                }
            }

            match upstream.next().await {
                Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(err)) => {
                    warn!(endpoint = %endpoint_url, error = %err, "stream read error, ending stream");
                    break;
                }
                None => break,
            }
        }

        record_reconciliation(
            &state,
            &entity,
            &request_id,
            &request_body,
            &Bytes::new(),
            &endpoint_url,
            accumulator.finish(),
            start.elapsed().as_millis() as i32,
            true,
            "success",
            "POST",
            "/v1/chat/completions",
            200,
        )
        .await;
    };

    Ok(Sse::new(sse_stream).keep_alive(axum::response::sse::KeepAlive::default()).into_response())
}

#[allow(clippy::too_many_arguments)]
async fn record_reconciliation(
    state: &AppState,
    entity: &AuthenticatedEntity,
    request_id: &str,
    request_body: &Value,
    response_body: &Bytes,
    endpoint_url: &str,
    usage: Option<Usage>,
    latency_ms: i32,
    streamed: bool,
    outcome: &'static str,
    method: &str,
    path: &str,
    status_code: i32,
) {
    let usage = usage.unwrap_or(Usage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 });

    // `state.recorder.record(&input)` below is the single writer for the monthly budget
    // counters and the TPM/TPH rate-limit windows; it must not be duplicated here.
    state.metrics.record_request(path, outcome, f64::from(latency_ms) / 1000.0);
    state.metrics.record_tokens(u64::from(usage.prompt_tokens), u64::from(usage.completion_tokens));

    let response_value: Option<Value> = serde_json::from_slice(response_body).ok();

    let input = ReconcileInput {
        request_id: request_id.to_string(),
        token_id: entity.token_id,
        user_id: entity.user_id,
        department: entity.department.clone(),
        model: request_body.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
        endpoint_url: endpoint_url.to_string(),
        prompt_tokens: i64::from(usage.prompt_tokens),
        completion_tokens: i64::from(usage.completion_tokens),
        total_tokens: i64::from(usage.total_tokens),
        latency_ms,
        streamed,
        outcome,
        method,
        path,
        status_code,
        request_body: Some(request_body),
        response_body: response_value.as_ref(),
    };

    state.recorder.record(&input).await;
}

/// `POST /v1/embeddings` — same pipeline, no streaming, output tokens always zero.
#[instrument(skip(state, entity, body), fields(model = %body.get("model").and_then(Value::as_str).unwrap_or_default()))]
pub async fn embeddings(
    State(state): State<AppState>,
    Extension(entity): Extension<AuthenticatedEntity>,
    RequestId(request_id): RequestId,
    JsonBody(body): JsonBody<Value>,
) -> Result<Response, ApiError> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request("missing field: model").with_param("model"))?
        .to_string();

    if !entity.may_use_model(&model) {
        return Err(ApiError::from(GatewayError::Permission(format!(
            "model '{model}' is not permitted for this token"
        ))));
    }

    let limits = state
        .quota
        .effective_limits(&QuotaInputs {
            token_id: entity.token_id,
            department: &entity.department,
            token_rpm: entity.rate_limit_rpm,
            token_tpm: entity.rate_limit_tpm,
            token_tph: entity.rate_limit_tph,
            token_tpd: entity.rate_limit_tpd,
        })
        .await;
    state.quota.check_and_admit(entity.token_id, &limits).await?;
    state
        .budget
        .check(&entity.department, entity.user_id, entity.token_id, entity.user_monthly_budget_tokens, entity.monthly_budget_tokens)
        .await?;

    let resolved = state.model_resolver.resolve(&model, &entity.allowed_models).await.map_err(ApiError::from)?;
    let endpoints = state.endpoint_selector.order(&resolved.model.id, &resolved.endpoints).await;
    if endpoints.is_empty() {
        return Err(ApiError::from(GatewayError::ServiceUnavailable(format!(
            "no healthy endpoints available for model '{model}'"
        ))));
    }

    let start = Instant::now();
    let outcome = forwarder::forward_unary(&state.http_client, &endpoints, "/embeddings", &body, &state.endpoint_selector).await;
    let latency_ms = start.elapsed().as_millis() as i32;

    let ForwardResult { status, body: response_body, usage, endpoint_url } = match outcome {
        Ok(result) => result,
        Err(message) => return Err(ApiError::from(GatewayError::ServiceUnavailable(message))),
    };

    let status_code = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let usage = usage.map(|u| Usage::for_embeddings(Some(u.prompt_tokens), Some(u.total_tokens)));

    record_reconciliation(
        &state,
        &entity,
        &request_id,
        &body,
        &response_body,
        &endpoint_url,
        usage,
        latency_ms,
        false,
        "success",
        "POST",
        "/v1/embeddings",
        status_code.as_u16() as i32,
    )
    .await;

    Ok((status_code, [(axum::http::header::CONTENT_TYPE, "application/json")], response_body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_response_serializes() {
        let response = HealthCheckResponse { status: "ok".to_string(), timestamp: "2026-01-01T00:00:00Z".to_string() };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
    }
}
