//! Request forwarding: URL normalization, body translation, response
//! classification, and the failover/recovery state machine.
//!
//! Non-streaming and streaming forwarding are handled by separate entry points since
//! once the SSE phase begins no further failover is permitted.

use bytes::Bytes;
use gateway_core::{Endpoint, UsageAccumulator};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Per-attempt upstream deadline, shared by the unary and streaming forwarding paths.
pub const DEADLINE: Duration = Duration::from_millis(120_000);

/// Outcome of one upstream attempt, driving the failover loop.
#[derive(Debug)]
pub enum Outcome {
    /// 2xx: forward as-is.
    Success { status: StatusCode, body: Bytes },
    /// 4xx not matching a recovery filter: forward verbatim, no failover.
    ClientError { status: StatusCode, body: Bytes },
    /// 400 complaining that `max_tokens` is too small: stable rewritten message.
    ClientMaxTokensTooSmall,
    /// 400 matching a context-window filter, with the request eligible for one retry.
    RecoverableContextWindow { body: Bytes },
    /// 5xx, timeout, or connection error: count a breaker failure and try the next endpoint.
    ServerErrorOrNetwork { message: String },
}

/// Strip a trailing slash, then append `target_path` unless the base already ends
/// with it; for `/embeddings`, a trailing `/chat/completions` is stripped first so the
/// same configured base URL can serve either path.
#[must_use]
pub fn normalize_url(base: &str, target_path: &str) -> String {
    let mut trimmed = base.trim_end_matches('/').to_string();

    if target_path == "/embeddings" {
        if let Some(stripped) = trimmed.strip_suffix("/chat/completions") {
            trimmed = stripped.to_string();
        }
    }

    if trimmed.ends_with(target_path) {
        return trimmed;
    }

    if trimmed.ends_with("/v1") {
        return format!("{trimmed}{target_path}");
    }

    format!("{trimmed}{target_path}")
}

/// Substitute `model` with the endpoint's upstream model name, leaving every other
/// field untouched.
#[must_use]
pub fn translate_body(mut body: Value, upstream_model_name: &str) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert("model".to_string(), Value::String(upstream_model_name.to_string()));
    }
    body
}

/// Inject `stream_options.include_usage = true` for the preliminary streaming attempt.
#[must_use]
pub fn with_stream_options_usage(mut body: Value) -> Value {
    if let Value::Object(map) = &mut body {
        let mut stream_options = serde_json::Map::new();
        stream_options.insert("include_usage".to_string(), Value::Bool(true));
        map.insert("stream_options".to_string(), Value::Object(stream_options));
    }
    body
}

/// Remove `stream_options`, used when retrying a streaming request without it.
#[must_use]
pub fn without_stream_options(mut body: Value) -> Value {
    if let Value::Object(map) = &mut body {
        map.remove("stream_options");
    }
    body
}

/// Remove `max_tokens`/`max_completion_tokens`, used for the context-window recovery
/// retry.
#[must_use]
pub fn without_max_tokens_fields(mut body: Value) -> Value {
    if let Value::Object(map) = &mut body {
        map.remove("max_tokens");
        map.remove("max_completion_tokens");
    }
    body
}

fn request_has_max_tokens_fields(body: &Value) -> bool {
    body.get("max_tokens").is_some() || body.get("max_completion_tokens").is_some()
}

fn body_matches_context_window_filter(body_text: &str) -> bool {
    let lower = body_text.to_lowercase();
    lower.contains("contextwindowexceedederror")
        || (lower.contains("max_tokens") && lower.contains("too large"))
        || (lower.contains("max_completion_tokens") && lower.contains("too large"))
        || (lower.contains("context length") && lower.contains("input tokens"))
}

fn body_matches_max_tokens_too_small(body_text: &str) -> bool {
    let lower = body_text.to_lowercase();
    lower.contains("max_tokens") && lower.contains("must be at least")
}

/// Classify a completed HTTP response into one of the five forwarding outcomes.
#[must_use]
pub fn classify(status: StatusCode, body: &Bytes, request_body: &Value) -> Outcome {
    if status.is_success() {
        return Outcome::Success { status, body: body.clone() };
    }

    if status.is_server_error() {
        return Outcome::ServerErrorOrNetwork {
            message: format!("upstream returned {status}"),
        };
    }

    if status == StatusCode::BAD_REQUEST {
        let body_text = String::from_utf8_lossy(body);

        if body_matches_max_tokens_too_small(&body_text) {
            return Outcome::ClientMaxTokensTooSmall;
        }

        if body_matches_context_window_filter(&body_text) && request_has_max_tokens_fields(request_body) {
            return Outcome::RecoverableContextWindow { body: body.clone() };
        }
    }

    Outcome::ClientError { status, body: body.clone() }
}

/// Issue one non-streaming HTTP attempt against `endpoint`, producing a classified
/// [`Outcome`]. Network errors and timeouts classify directly as
/// [`Outcome::ServerErrorOrNetwork`].
pub async fn attempt(client: &Client, endpoint: &Endpoint, path: &str, body: &Value) -> Outcome {
    let url = normalize_url(&endpoint.url, path);

    let mut request = client.post(&url).timeout(DEADLINE).json(body);
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
        Ok(response) => {
            let status = response.status();
            match response.bytes().await {
                Ok(bytes) => classify(status, &bytes, body),
                Err(err) => Outcome::ServerErrorOrNetwork { message: err.to_string() },
            }
        }
        Err(err) => Outcome::ServerErrorOrNetwork { message: err.to_string() },
    }
}

/// Result of the non-streaming forward loop: the final response to return to the
/// client plus the usage observed, if any.
pub struct ForwardResult {
    pub status: StatusCode,
    pub body: Bytes,
    pub usage: Option<gateway_core::Usage>,
    pub endpoint_url: String,
}

/// Non-streaming forward across `endpoints`, with context-window recovery against the
/// same endpoint and failover to the next endpoint on server error/network failure.
///
/// # Errors
/// Returns `Err(message)` with the last observed error once every endpoint has been
/// exhausted.
pub async fn forward_unary(
    client: &Client,
    endpoints: &[Endpoint],
    path: &str,
    request_body: &Value,
    selector: &gateway_routing::EndpointSelector,
) -> Result<ForwardResult, String> {
    let mut last_error = "no endpoints available".to_string();

    for endpoint in endpoints {
        let body = translate_body(request_body.clone(), &endpoint.model_name);
        let outcome = attempt(client, endpoint, path, &body).await;

        match outcome {
            Outcome::Success { status, body } => {
                selector.record_success(&endpoint.url).await;
                let usage = extract_usage(&body);
                return Ok(ForwardResult { status, body, usage, endpoint_url: endpoint.url.clone() });
            }
            Outcome::ClientError { status, body } => {
                return Ok(ForwardResult { status, body, usage: extract_usage(&body), endpoint_url: endpoint.url.clone() });
            }
            Outcome::ClientMaxTokensTooSmall => {
                let body = stable_max_tokens_error_body();
                return Ok(ForwardResult {
                    status: StatusCode::BAD_REQUEST,
                    body,
                    usage: None,
                    endpoint_url: endpoint.url.clone(),
                });
            }
            Outcome::RecoverableContextWindow { body: original_body } => {
                let retry_body = without_max_tokens_fields(body.clone());
                let retry_outcome = attempt(client, endpoint, path, &retry_body).await;
                return Ok(match retry_outcome {
                    Outcome::Success { status, body } => {
                        selector.record_success(&endpoint.url).await;
                        ForwardResult { status, usage: extract_usage(&body), body, endpoint_url: endpoint.url.clone() }
                    }
                    Outcome::ClientError { status, body } => {
                        ForwardResult { status, usage: extract_usage(&body), body, endpoint_url: endpoint.url.clone() }
                    }
                    _ => ForwardResult {
                        status: StatusCode::BAD_REQUEST,
                        body: original_body,
                        usage: None,
                        endpoint_url: endpoint.url.clone(),
                    },
                });
            }
            Outcome::ServerErrorOrNetwork { message } => {
                selector.record_failure(&endpoint.url).await;
                last_error = message;
            }
        }
    }

    Err(last_error)
}

fn extract_usage(body: &Bytes) -> Option<gateway_core::Usage> {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("usage").cloned())
        .and_then(|v| serde_json::from_value(v).ok())
}

fn stable_max_tokens_error_body() -> Bytes {
    let body = serde_json::json!({
        "error": {
            "type": "invalid_request_error",
            "message": "max_tokens is too small for this request",
        }
    });
    Bytes::from(serde_json::to_vec(&body).unwrap_or_default())
}

/// Split an accumulating buffer of upstream bytes into complete lines on `\n`,
/// returning the complete lines and leaving any trailing partial line in `buffer`.
pub fn drain_complete_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line = buffer[..pos].to_string();
        lines.push(line);
        buffer.drain(..=pos);
    }
    lines
}

/// One SSE forwarding effect produced while processing upstream lines.
#[derive(Debug, PartialEq, Eq)]
pub enum SseEvent {
    /// Forward this exact payload to the client, framed as `data: <payload>\n\n`.
    Data(String),
    /// Forward a non-`data:` non-empty line as `<line>\n`.
    Raw(String),
}

/// Process one complete upstream line per the SSE framing rules: `data: ` lines are
/// unwrapped for forwarding and fed to `accumulator`; other non-empty lines pass
/// through; empty lines are frame separators and produce no event.
pub fn process_sse_line(line: &str, accumulator: &mut UsageAccumulator) -> Option<SseEvent> {
    if line.is_empty() {
        return None;
    }

    if let Some(payload) = line.strip_prefix("data: ") {
        if payload != "[DONE]" {
            accumulator.observe(payload);
        }
        return Some(SseEvent::Data(payload.to_string()));
    }

    Some(SseEvent::Raw(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::ProviderId;

    fn endpoint() -> Endpoint {
        Endpoint::new(ProviderId::new("m1"), "https://p.example/v1", "gpt-4")
    }

    #[test]
    fn test_normalize_url_appends_chat_completions_to_v1_base() {
        assert_eq!(
            normalize_url("https://p.example/v1", "/chat/completions"),
            "https://p.example/v1/chat/completions"
        );
    }

    #[test]
    fn test_normalize_url_trims_trailing_slash() {
        assert_eq!(
            normalize_url("https://p.example/v1/", "/chat/completions"),
            "https://p.example/v1/chat/completions"
        );
    }

    #[test]
    fn test_normalize_url_leaves_already_suffixed_base_alone() {
        assert_eq!(
            normalize_url("https://p.example/v1/chat/completions", "/chat/completions"),
            "https://p.example/v1/chat/completions"
        );
    }

    #[test]
    fn test_normalize_url_embeddings_strips_chat_completions_suffix() {
        assert_eq!(
            normalize_url("https://p.example/v1/chat/completions", "/embeddings"),
            "https://p.example/v1/embeddings"
        );
    }

    #[test]
    fn test_translate_body_substitutes_model_and_keeps_rest() {
        let body = serde_json::json!({"model": "gpt4", "messages": [{"role": "user", "content": "hi"}]});
        let translated = translate_body(body, "gpt-4-upstream");
        assert_eq!(translated["model"], "gpt-4-upstream");
        assert_eq!(translated["messages"][0]["role"], "user");
    }

    #[test]
    fn test_classify_success() {
        let body = Bytes::from_static(b"{}");
        let outcome = classify(StatusCode::OK, &body, &Value::Null);
        assert!(matches!(outcome, Outcome::Success { .. }));
    }

    #[test]
    fn test_classify_server_error() {
        let body = Bytes::from_static(b"boom");
        let outcome = classify(StatusCode::BAD_GATEWAY, &body, &Value::Null);
        assert!(matches!(outcome, Outcome::ServerErrorOrNetwork { .. }));
    }

    #[test]
    fn test_classify_recoverable_context_window_requires_max_tokens_in_request() {
        let body = Bytes::from_static(b"{\"error\":\"max_tokens too large for context\"}");
        let request = serde_json::json!({"model": "gpt4", "max_tokens": 8000});
        let outcome = classify(StatusCode::BAD_REQUEST, &body, &request);
        assert!(matches!(outcome, Outcome::RecoverableContextWindow { .. }));
    }

    #[test]
    fn test_classify_context_window_filter_without_max_tokens_field_is_client_error() {
        let body = Bytes::from_static(b"{\"error\":\"max_tokens too large for context\"}");
        let request = serde_json::json!({"model": "gpt4"});
        let outcome = classify(StatusCode::BAD_REQUEST, &body, &request);
        assert!(matches!(outcome, Outcome::ClientError { .. }));
    }

    #[test]
    fn test_classify_max_tokens_too_small() {
        let body = Bytes::from_static(b"{\"error\":\"max_tokens must be at least 1\"}");
        let outcome = classify(StatusCode::BAD_REQUEST, &body, &Value::Null);
        assert!(matches!(outcome, Outcome::ClientMaxTokensTooSmall));
    }

    #[test]
    fn test_classify_generic_400_is_client_error() {
        let body = Bytes::from_static(b"{\"error\":\"invalid role\"}");
        let outcome = classify(StatusCode::BAD_REQUEST, &body, &Value::Null);
        assert!(matches!(outcome, Outcome::ClientError { .. }));
    }

    #[test]
    fn test_drain_complete_lines_keeps_partial_tail() {
        let mut buffer = "data: a\ndata: b\npartial".to_string();
        let lines = drain_complete_lines(&mut buffer);
        assert_eq!(lines, vec!["data: a".to_string(), "data: b".to_string()]);
        assert_eq!(buffer, "partial");
    }

    #[test]
    fn test_process_sse_line_forwards_data_payload() {
        let mut acc = UsageAccumulator::new();
        let event = process_sse_line("data: {\"choices\":[]}", &mut acc);
        assert_eq!(event, Some(SseEvent::Data("{\"choices\":[]}".to_string())));
    }

    #[test]
    fn test_process_sse_line_captures_usage() {
        let mut acc = UsageAccumulator::new();
        process_sse_line(
            "data: {\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":7,\"total_tokens\":10}}",
            &mut acc,
        );
        let usage = acc.finish().expect("usage observed");
        assert_eq!(usage.completion_tokens, 7);
    }

    #[test]
    fn test_process_sse_line_done_not_parsed_but_forwarded() {
        let mut acc = UsageAccumulator::new();
        let event = process_sse_line("data: [DONE]", &mut acc);
        assert_eq!(event, Some(SseEvent::Data("[DONE]".to_string())));
        assert!(acc.finish().is_none());
    }

    #[test]
    fn test_process_sse_line_empty_is_separator() {
        let mut acc = UsageAccumulator::new();
        assert_eq!(process_sse_line("", &mut acc), None);
    }

    #[test]
    fn test_process_sse_line_raw_non_data_line_passes_through() {
        let mut acc = UsageAccumulator::new();
        let event = process_sse_line("event: ping", &mut acc);
        assert_eq!(event, Some(SseEvent::Raw("event: ping".to_string())));
    }

    #[test]
    fn test_endpoint_fixture_smoke() {
        let ep = endpoint();
        assert_eq!(ep.model_name, "gpt-4");
    }
}
