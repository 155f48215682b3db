//! A `wiremock`-backed stand-in for a single OpenAI-compatible upstream endpoint.

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A mock upstream chat-completions endpoint.
pub struct MockUpstream {
    pub server: MockServer,
}

impl MockUpstream {
    /// Start a fresh mock server with no expectations registered yet.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL, suitable for a `models.endpoint_url` fixture row.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Respond to every `/chat/completions` POST with a successful completion
    /// carrying the given usage figures.
    pub async fn mock_success(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(model, prompt_tokens, completion_tokens)))
            .mount(&self.server)
            .await;
    }

    /// Respond with a bare status code and an arbitrary JSON error body.
    pub async fn mock_status(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Respond with a `400` whose body matches the context-window-recovery filter
    /// once, then a normal SSE stream on the retry (the forwarder strips
    /// `max_tokens`/`max_completion_tokens` and resubmits to the same endpoint).
    pub async fn mock_context_window_then_stream(&self) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(wiremock::matchers::body_partial_json(json!({"max_tokens": 8000})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "max_tokens too large for this model's context window",
            })))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(), "text/event-stream")
                    .append_header("Content-Type", "text/event-stream"),
            )
            .mount(&self.server)
            .await;
    }

    /// Respond to every request with a streamed SSE body.
    pub async fn mock_stream(&self) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(), "text/event-stream")
                    .append_header("Content-Type", "text/event-stream"),
            )
            .mount(&self.server)
            .await;
    }
}

fn chat_response(model: &str, prompt_tokens: u32, completion_tokens: u32) -> Value {
    json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "hello"},
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        },
    })
}

fn sse_body() -> String {
    [
        r#"data: {"choices":[{"delta":{"content":"hel"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
        r#"data: {"usage":{"prompt_tokens":3,"completion_tokens":2}}"#,
        "data: [DONE]",
        "",
    ]
    .join("\n\n")
}
