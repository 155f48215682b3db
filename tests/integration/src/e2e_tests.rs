//! End-to-end pipeline scenarios (auth -> quota -> budget -> resolve -> select ->
//! forward -> reconcile), driven through the real Axum router with `oneshot`.

use crate::fixtures::{insert_dept_budget, insert_model, insert_sub_model, insert_token, insert_token_with_allowed_models};
use crate::helpers::{chat_request, spin_up};
use crate::mock_upstream::MockUpstream;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::StreamExt;
use http_body_util::BodyExt;
use tower::ServiceExt;

fn authed_request(uri: &str, key: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {key}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// E1: happy unary completion. Client gets the upstream body unchanged, and usage
/// is accounted for the requesting token.
#[tokio::test]
async fn e1_happy_unary_returns_upstream_body_and_usage() {
    let gw = spin_up().await;
    let upstream = MockUpstream::start().await;
    upstream.mock_success("gpt4", 3, 7).await;

    insert_model(&gw.pool, "gpt4", &upstream.url()).await;
    let token = insert_token(&gw.pool, "eng", None, None).await;

    let response = gw
        .router
        .oneshot(authed_request("/v1/chat/completions", &token.raw_key, chat_request("gpt4", false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["usage"]["prompt_tokens"], 3);
    assert_eq!(json["usage"]["completion_tokens"], 7);
}

/// E2: RPM exceeded. The third request within the window is rejected with 429,
/// `error.param = "rpm"`, and `Retry-After: 60`, and never reaches the upstream.
#[tokio::test]
async fn e2_rpm_exceeded_rejects_without_calling_upstream() {
    let gw = spin_up().await;
    let upstream = MockUpstream::start().await;
    upstream.mock_success("gpt4", 1, 1).await;

    insert_model(&gw.pool, "gpt4", &upstream.url()).await;
    let token = insert_token(&gw.pool, "eng", Some(2), None).await;

    for _ in 0..2 {
        let response = gw
            .router
            .clone()
            .oneshot(authed_request("/v1/chat/completions", &token.raw_key, chat_request("gpt4", false)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = gw
        .router
        .oneshot(authed_request("/v1/chat/completions", &token.raw_key, chat_request("gpt4", false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = response.headers().get("retry-after").and_then(|v| v.to_str().ok()).map(str::to_string);
    assert_eq!(retry_after.as_deref(), Some("60"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["param"], "rpm");
}

/// E3: failover. The primary endpoint returns 502, the secondary returns 200; the
/// client sees the secondary's body.
#[tokio::test]
async fn e3_failover_to_second_endpoint_on_502() {
    let gw = spin_up().await;
    let primary = MockUpstream::start().await;
    primary.mock_status(502, serde_json::json!({"error": "bad gateway"})).await;
    let secondary = MockUpstream::start().await;
    secondary.mock_success("gpt4", 2, 4).await;

    let model_id = insert_model(&gw.pool, "gpt4", &primary.url()).await;
    insert_sub_model(&gw.pool, model_id, 1, &secondary.url()).await;
    let token = insert_token(&gw.pool, "eng", None, None).await;

    let response = gw
        .router
        .oneshot(authed_request("/v1/chat/completions", &token.raw_key, chat_request("gpt4", false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["usage"]["completion_tokens"], 4);
}

/// E4: context-window recovery while streaming. A `400` matching the context-window
/// filter, triggered by a request carrying `max_tokens`, retries once against the
/// same endpoint without `max_tokens`/`max_completion_tokens` and the client
/// receives the resulting SSE stream.
#[tokio::test]
async fn e4_context_window_recovery_returns_stream_on_retry() {
    let gw = spin_up().await;
    let upstream = MockUpstream::start().await;
    upstream.mock_context_window_then_stream().await;

    insert_model(&gw.pool, "gpt4", &upstream.url()).await;
    let token = insert_token(&gw.pool, "eng", None, None).await;

    let mut body = chat_request("gpt4", true);
    body["max_tokens"] = serde_json::json!(8000);

    let response = gw.router.oneshot(authed_request("/v1/chat/completions", &token.raw_key, body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let collected = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&collected);
    assert!(text.contains("hel"), "expected streamed content frames, got: {text}");
}

/// E5: all endpoints down. Client receives 503.
#[tokio::test]
async fn e5_all_endpoints_down_returns_503() {
    let gw = spin_up().await;
    let a = MockUpstream::start().await;
    a.mock_status(500, serde_json::json!({"error": "boom"})).await;
    let b = MockUpstream::start().await;
    b.mock_status(500, serde_json::json!({"error": "boom"})).await;

    let model_id = insert_model(&gw.pool, "gpt4", &a.url()).await;
    insert_sub_model(&gw.pool, model_id, 1, &b.url()).await;
    let token = insert_token(&gw.pool, "eng", None, None).await;

    let response = gw
        .router
        .oneshot(authed_request("/v1/chat/completions", &token.raw_key, chat_request("gpt4", false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

/// E6: cancel mid-stream. The client reads only the first SSE frame and drops the
/// response body early; no panic occurs and the bytes read so far are well-formed.
#[tokio::test]
async fn e6_client_can_drop_stream_after_first_frame() {
    let gw = spin_up().await;
    let upstream = MockUpstream::start().await;
    upstream.mock_stream().await;

    insert_model(&gw.pool, "gpt4", &upstream.url()).await;
    let token = insert_token(&gw.pool, "eng", None, None).await;

    let response = gw
        .router
        .oneshot(authed_request("/v1/chat/completions", &token.raw_key, chat_request("gpt4", true)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let mut stream = response.into_body().into_data_stream();
    let first = stream.next().await;
    assert!(first.is_some(), "expected at least one frame before the client disconnects");
    drop(stream);
}

/// A department budget row existing (rather than absent) does not itself break the
/// happy path when the token's own usage is still under any effective cap.
#[tokio::test]
async fn dept_budget_row_present_does_not_block_under_cap() {
    let gw = spin_up().await;
    let upstream = MockUpstream::start().await;
    upstream.mock_success("gpt4", 1, 1).await;

    insert_model(&gw.pool, "gpt4", &upstream.url()).await;
    insert_dept_budget(&gw.pool, "eng", Some(1_000_000)).await;
    let token = insert_token(&gw.pool, "eng", None, None).await;

    let response = gw
        .router
        .oneshot(authed_request("/v1/chat/completions", &token.raw_key, chat_request("gpt4", false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

/// Requests to a model outside the token's `allowed_models` are rejected with 403.
#[tokio::test]
async fn model_not_allowed_for_token_is_rejected() {
    let gw = spin_up().await;
    let upstream = MockUpstream::start().await;
    upstream.mock_success("claude", 1, 1).await;
    insert_model(&gw.pool, "claude", &upstream.url()).await;

    let token = insert_token_with_allowed_models(&gw.pool, "eng", None, None, &["gpt4"]).await;

    let response = gw
        .router
        .oneshot(authed_request("/v1/chat/completions", &token.raw_key, chat_request("claude", false)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// An unauthenticated request never reaches the quota/budget/forwarding pipeline.
#[tokio::test]
async fn missing_auth_header_rejected_before_pipeline() {
    let gw = spin_up().await;

    let response = gw
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(chat_request("gpt4", false).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
