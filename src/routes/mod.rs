// Inbound HTTP surface
//
// /v1/messages and /claude/v1/messages speak the Anthropic Messages dialect;
// /admin/* is the account management API; /health is for load balancers.

pub mod admin;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;

use crate::account::AccountService;
use crate::auth::TokenManager;
use crate::config::Config;
use crate::error::ApiError;
use crate::http_client::UpstreamClient;
use crate::middleware;
use crate::models::anthropic::AnthropicMessagesRequest;
use crate::proxy;
use crate::storage::Storage;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<Storage>,
    pub accounts: Arc<AccountService>,
    pub token_manager: Arc<TokenManager>,
    pub upstream: Arc<UpstreamClient>,
}

/// Build the full application router
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(messages_routes(state.clone()))
        .merge(admin::admin_routes(state))
        .layer(middleware::cors_layer())
}

pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_handler))
}

pub fn messages_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(messages_handler))
        .route("/claude/v1/messages", post(messages_handler))
        .with_state(state)
}

/// GET /health - liveness probe, no authentication
async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// API key from `x-api-key`, falling back to `Authorization: Bearer`
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// POST /v1/messages - Anthropic Messages proxy endpoint
async fn messages_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let api_key =
        extract_api_key(&headers).ok_or_else(|| ApiError::Auth("Missing API key".to_string()))?;
    let account_name = proxy::resolve_account(&state, &api_key)?;

    let request: AnthropicMessagesRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid request body: {}", e)))?;

    if request.messages.is_empty() {
        return Err(ApiError::Validation("messages cannot be empty".to_string()));
    }

    tracing::info!(
        "Request from account '{}', model: {}, stream: {}",
        account_name,
        request.model,
        request.stream
    );

    if request.stream {
        let sse = proxy::handle_streaming(state.clone(), account_name, request)
            .map(|record| Ok::<_, Infallible>(Bytes::from(record)));

        let response = Response::builder()
            .status(200)
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .header("X-Accel-Buffering", "no")
            .body(Body::from_stream(sse))
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))?;

        Ok(response)
    } else {
        let response = proxy::handle_non_streaming(&state, &account_name, &request).await?;
        Ok(Json(response).into_response())
    }
}
