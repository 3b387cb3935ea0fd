// Integration tests for Kiro Proxy
//
// These tests exercise the full HTTP stack: routing, API-key resolution,
// request conversion, the upstream round trip (mocked), and both response
// translation paths.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

use kiro_proxy::{
    account::AccountService,
    auth::types::TokenBlob,
    auth::TokenManager,
    config::Config,
    http_client::UpstreamClient,
    routes::{self, AppState},
    storage::Storage,
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

/// One AWS Event Stream frame around a JSON payload, CRC fields zeroed
fn build_frame(payload: &str) -> Vec<u8> {
    let total_len = (payload.len() + 16) as u32;
    let mut frame = Vec::new();
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame.extend_from_slice(&[0; 4]);
    frame.extend_from_slice(payload.as_bytes());
    frame.extend_from_slice(&[0; 4]);
    frame
}

fn event_stream(payloads: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    for payload in payloads {
        body.extend(build_frame(payload));
    }
    body
}

struct TestHarness {
    _dir: tempfile::TempDir,
    state: AppState,
    app: Router,
}

fn build_harness(server_url: &str) -> TestHarness {
    let dir = tempfile::TempDir::new().unwrap();

    let config = Arc::new(Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 8080,
        data_dir: dir.path().to_path_buf(),
        codewhisperer_url: format!("{}/generateAssistantResponse", server_url),
        profiles_url: format!("{}/ListAvailableProfiles", server_url),
        refresh_url: format!("{}/token", server_url),
        model_mapping: Default::default(),
        static_accounts: Vec::new(),
        admin_username: "admin".to_string(),
        admin_password: "admin123".to_string(),
        upstream_timeout: 120,
        log_level: "info".to_string(),
    });

    let storage = Arc::new(Storage::new(dir.path()).unwrap());
    let token_manager = Arc::new(
        TokenManager::new(
            storage.clone(),
            config.refresh_url.clone(),
            config.profiles_url.clone(),
        )
        .unwrap(),
    );
    let upstream = Arc::new(
        UpstreamClient::new(
            token_manager.clone(),
            config.codewhisperer_url.clone(),
            config.upstream_timeout,
        )
        .unwrap(),
    );
    let accounts = Arc::new(AccountService::new(storage.clone()));

    let state = AppState {
        config,
        storage,
        accounts,
        token_manager,
        upstream,
    };
    let app = routes::app(state.clone());

    TestHarness {
        _dir: dir,
        state,
        app,
    }
}

/// Seed one enabled account with a fresh token blob
fn seed_account(state: &AppState, name: &str, api_key: &str) {
    state.storage.create_account(name, api_key).unwrap();
    state
        .storage
        .save_token(
            name,
            &TokenBlob {
                access_token: "valid-access-token".to_string(),
                refresh_token: "refresh-token".to_string(),
                expires_at: Some(TokenBlob::format_expires_at(Utc::now() + Duration::hours(1))),
                client_id: Some("client-id".to_string()),
                client_secret: Some("client-secret".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
}

async fn profiles_mock(server: &mut mockito::ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/ListAvailableProfiles")
        .with_status(200)
        .with_body(r#"{"profiles":[{"arn":"arn:aws:codewhisperer:us-east-1:123:profile/TEST"}]}"#)
        .create_async()
        .await
}

async fn body_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn parse_sse(text: &str) -> Vec<(String, Value)> {
    text.split("\n\n")
        .filter(|record| !record.trim().is_empty())
        .map(|record| {
            let mut lines = record.lines();
            let event = lines
                .next()
                .unwrap()
                .strip_prefix("event: ")
                .unwrap()
                .to_string();
            let data = lines.next().unwrap().strip_prefix("data: ").unwrap();
            (event, serde_json::from_str(data).unwrap())
        })
        .collect()
}

// ==================================================================================================
// Non-Streaming (batch) Path
// ==================================================================================================

#[tokio::test]
async fn test_non_streaming_plain_text() {
    // Upstream answers with two content frames; the caller gets one
    // aggregated Anthropic message back.
    let mut server = mockito::Server::new_async().await;
    let _profiles = profiles_mock(&mut server).await;
    let upstream = server
        .mock("POST", "/generateAssistantResponse")
        .match_header("authorization", "Bearer valid-access-token")
        .with_status(200)
        .with_body(event_stream(&[
            r#"{"content":"Hello"}"#,
            r#"{"content":" world"}"#,
        ]))
        .expect(1)
        .create_async()
        .await;

    let harness = build_harness(&server.url());
    seed_account(&harness.state, "alice", "sk-kiro-alice-test");

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("x-api-key", "sk-kiro-alice-test")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"model":"claude-sonnet-4-5","max_tokens":100,"messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;

    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["model"], "claude-sonnet-4-5");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(
        body["content"],
        json!([{"type": "text", "text": "Hello world"}])
    );
    assert!(body["usage"]["output_tokens"].as_u64().unwrap() > 0);
    upstream.assert_async().await;
}

#[tokio::test]
async fn test_non_streaming_upstream_error_is_500() {
    let mut server = mockito::Server::new_async().await;
    let _profiles = profiles_mock(&mut server).await;
    // 500 is returned without a retry
    let upstream = server
        .mock("POST", "/generateAssistantResponse")
        .with_status(500)
        .with_body("upstream broke")
        .expect(1)
        .create_async()
        .await;

    let harness = build_harness(&server.url());
    seed_account(&harness.state, "alice", "sk-kiro-alice-test");

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("x-api-key", "sk-kiro-alice-test")
                .body(Body::from(
                    r#"{"model":"m","max_tokens":10,"messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["type"], "error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("upstream broke"));
    upstream.assert_async().await;
}

#[tokio::test]
async fn test_auth_retry_refreshes_once_and_succeeds() {
    // First upstream POST is 403; the OIDC endpoint must be hit exactly
    // once and the replay must carry the refreshed token.
    let mut server = mockito::Server::new_async().await;
    let _profiles = profiles_mock(&mut server).await;

    let rejected = server
        .mock("POST", "/generateAssistantResponse")
        .match_header("authorization", "Bearer valid-access-token")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::PartialJson(
            json!({"grantType": "refresh_token"}),
        ))
        .with_status(200)
        .with_body(r#"{"accessToken":"rotated-token","expiresIn":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let accepted = server
        .mock("POST", "/generateAssistantResponse")
        .match_header("authorization", "Bearer rotated-token")
        .with_status(200)
        .with_body(event_stream(&[r#"{"content":"ok"}"#]))
        .expect(1)
        .create_async()
        .await;

    let harness = build_harness(&server.url());
    seed_account(&harness.state, "alice", "sk-kiro-alice-test");

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("x-api-key", "sk-kiro-alice-test")
                .body(Body::from(
                    r#"{"model":"m","max_tokens":10,"messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    rejected.assert_async().await;
    refresh.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_auth_failure_twice_is_500_with_two_posts() {
    let mut server = mockito::Server::new_async().await;
    let _profiles = profiles_mock(&mut server).await;

    let upstream = server
        .mock("POST", "/generateAssistantResponse")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;

    server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"accessToken":"rotated-token","expiresIn":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let harness = build_harness(&server.url());
    seed_account(&harness.state, "alice", "sk-kiro-alice-test");

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("x-api-key", "sk-kiro-alice-test")
                .body(Body::from(
                    r#"{"model":"m","max_tokens":10,"messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    upstream.assert_async().await;
}

#[tokio::test]
async fn test_model_mapping_applied_to_upstream_body() {
    let mut server = mockito::Server::new_async().await;
    let _profiles = profiles_mock(&mut server).await;

    let upstream = server
        .mock("POST", "/generateAssistantResponse")
        .match_body(mockito::Matcher::PartialJson(json!({
            "profileArn": "arn:aws:codewhisperer:us-east-1:123:profile/TEST",
            "conversationState": {
                "chatTriggerType": "MANUAL",
                "currentMessage": {
                    "userInputMessage": {
                        "content": "hi",
                        "modelId": "CLAUDE_SONNET_4_5_V1_0",
                        "origin": "AI_EDITOR"
                    }
                }
            }
        })))
        .with_status(200)
        .with_body(event_stream(&[r#"{"content":"ok"}"#]))
        .expect(1)
        .create_async()
        .await;

    let server_url = server.url();
    let mut harness = build_harness(&server_url);
    let mut config = (*harness.state.config).clone();
    config.model_mapping.insert(
        "claude-sonnet-4-5".to_string(),
        "CLAUDE_SONNET_4_5_V1_0".to_string(),
    );
    harness.state.config = Arc::new(config);
    harness.app = routes::app(harness.state.clone());
    seed_account(&harness.state, "alice", "sk-kiro-alice-test");

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("x-api-key", "sk-kiro-alice-test")
                .body(Body::from(
                    r#"{"model":"claude-sonnet-4-5","max_tokens":10,"messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    // The response echoes the caller's model name, not the mapped id
    assert_eq!(body["model"], "claude-sonnet-4-5");
    upstream.assert_async().await;
}

// ==================================================================================================
// Streaming Path
// ==================================================================================================

#[tokio::test]
async fn test_streaming_with_thinking_and_headers() {
    let mut server = mockito::Server::new_async().await;
    let _profiles = profiles_mock(&mut server).await;

    let upstream = server
        .mock("POST", "/generateAssistantResponse")
        .with_status(200)
        .with_body(event_stream(&[
            r#"{"conversationId":"conv-1"}"#,
            r#"{"content":"Hello <thinking>reason</thinking> world"}"#,
        ]))
        .expect(1)
        .create_async()
        .await;

    let harness = build_harness(&server.url());
    seed_account(&harness.state, "alice", "sk-kiro-alice-test");

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("x-api-key", "sk-kiro-alice-test")
                .body(Body::from(
                    r#"{"model":"claude-sonnet-4-5","max_tokens":100,"stream":true,"messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");

    let records = parse_sse(&body_text(response.into_body()).await);
    let events: Vec<&str> = records.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(
        events,
        vec![
            "message_start",
            "ping",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    let text: String = records
        .iter()
        .filter(|(_, d)| d["delta"]["type"] == "text_delta")
        .map(|(_, d)| d["delta"]["text"].as_str().unwrap())
        .collect();
    assert_eq!(text, "Hello  world");

    let thinking: String = records
        .iter()
        .filter(|(_, d)| d["delta"]["type"] == "thinking_delta")
        .map(|(_, d)| d["delta"]["thinking"].as_str().unwrap())
        .collect();
    assert_eq!(thinking, "reason");

    upstream.assert_async().await;
}

#[tokio::test]
async fn test_streaming_tool_use() {
    let mut server = mockito::Server::new_async().await;
    let _profiles = profiles_mock(&mut server).await;

    server
        .mock("POST", "/generateAssistantResponse")
        .with_status(200)
        .with_body(event_stream(&[
            r#"{"conversationId":"conv-1"}"#,
            r#"{"toolUseId":"t1","name":"lookup"}"#,
            r#"{"toolUseId":"t1","name":"lookup","input":"{\"q\":"}"#,
            r#"{"toolUseId":"t1","name":"lookup","input":"\"x\"}"}"#,
            r#"{"toolUseId":"t1","name":"lookup","stop":true}"#,
        ]))
        .create_async()
        .await;

    let harness = build_harness(&server.url());
    seed_account(&harness.state, "alice", "sk-kiro-alice-test");

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("x-api-key", "sk-kiro-alice-test")
                .body(Body::from(
                    r#"{"model":"m","max_tokens":100,"stream":true,"messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let records = parse_sse(&body_text(response.into_body()).await);

    let (_, start) = records
        .iter()
        .find(|(e, _)| e == "content_block_start")
        .unwrap();
    assert_eq!(start["content_block"]["type"], "tool_use");
    assert_eq!(start["content_block"]["id"], "t1");
    assert_eq!(start["content_block"]["name"], "lookup");

    let partial: String = records
        .iter()
        .filter(|(_, d)| d["delta"]["type"] == "input_json_delta")
        .map(|(_, d)| d["delta"]["partial_json"].as_str().unwrap())
        .collect();
    assert_eq!(partial, r#"{"q":"x"}"#);

    let (_, delta) = records.iter().find(|(e, _)| e == "message_delta").unwrap();
    assert_eq!(delta["delta"]["stop_reason"], "end_turn");
}

#[tokio::test]
async fn test_streaming_upstream_error_becomes_error_record() {
    let mut server = mockito::Server::new_async().await;
    let _profiles = profiles_mock(&mut server).await;

    server
        .mock("POST", "/generateAssistantResponse")
        .with_status(500)
        .with_body("unavailable")
        .expect(1)
        .create_async()
        .await;

    let harness = build_harness(&server.url());
    seed_account(&harness.state, "alice", "sk-kiro-alice-test");

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("x-api-key", "sk-kiro-alice-test")
                .body(Body::from(
                    r#"{"model":"m","max_tokens":100,"stream":true,"messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    // The SSE channel is already committed, so the error rides inside it
    assert_eq!(response.status(), StatusCode::OK);
    let records = parse_sse(&body_text(response.into_body()).await);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "error");
    assert!(records[0].1["error"]["message"]
        .as_str()
        .unwrap()
        .contains("500"));
}
