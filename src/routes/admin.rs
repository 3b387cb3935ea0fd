// Admin API
// Account CRUD and token operations, guarded by basic auth

use axum::{
    extract::{Path, State},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::types::TokenBlob;
use crate::error::ApiError;
use crate::middleware;
use crate::models::anthropic::{AnthropicMessage, AnthropicMessagesRequest, MessageContent};
use crate::proxy;
use crate::storage::AccountUpdate;

use super::AppState;

// ==================================================================================================
// Request / Response Models
// ==================================================================================================

#[derive(Debug, Deserialize)]
pub struct AccountCreate {
    pub name: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenUpdate {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub client_id_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ==================================================================================================
// Router
// ==================================================================================================

pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/admin/accounts", get(list_accounts).post(create_account))
        .route(
            "/admin/accounts/:name",
            get(get_account).put(update_account).delete(delete_account),
        )
        .route("/admin/accounts/:name/toggle", post(toggle_account))
        .route("/admin/accounts/:name/token", post(update_token))
        .route("/admin/accounts/:name/refresh", post(refresh_token))
        .route("/admin/accounts/:name/test", post(test_account))
        .route("/admin/check-auth", get(check_auth))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ))
        .with_state(state)
}

// ==================================================================================================
// Handlers
// ==================================================================================================

async fn list_accounts(State(state): State<AppState>) -> Response {
    Json(state.accounts.list_accounts()).into_response()
}

async fn get_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let account = state
        .accounts
        .get_account(&name)
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;
    Ok(Json(account).into_response())
}

async fn create_account(
    State(state): State<AppState>,
    Json(data): Json<AccountCreate>,
) -> Result<Response, ApiError> {
    let account = state
        .accounts
        .create_account(&data.name, data.api_key)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(Json(account).into_response())
}

async fn update_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(updates): Json<AccountUpdate>,
) -> Result<Response, ApiError> {
    let account = state
        .accounts
        .update_account(&name, updates)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;
    Ok(Json(account).into_response())
}

async fn delete_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    let deleted = state
        .accounts
        .delete_account(&name)
        .map_err(ApiError::Internal)?;
    if !deleted {
        return Err(ApiError::NotFound("Account not found".to_string()));
    }
    Ok(Json(ApiResponse {
        success: true,
        message: format!("Account '{}' deleted", name),
        data: None,
    }))
}

async fn toggle_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let account = state
        .accounts
        .toggle_account(&name)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;
    Ok(Json(account).into_response())
}

async fn update_token(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(data): Json<TokenUpdate>,
) -> Result<Json<ApiResponse>, ApiError> {
    if state.accounts.get_account(&name).is_none() {
        return Err(ApiError::NotFound("Account not found".to_string()));
    }

    let blob = TokenBlob {
        access_token: data.access_token,
        refresh_token: data.refresh_token,
        expires_at: Some(data.expires_at),
        client_id: Some(data.client_id),
        client_secret: Some(data.client_secret),
        client_id_hash: data.client_id_hash,
        ..Default::default()
    };

    state
        .accounts
        .save_token(&name, &blob)
        .map_err(ApiError::Internal)?;

    Ok(Json(ApiResponse {
        success: true,
        message: format!("Token updated for '{}'", name),
        data: None,
    }))
}

/// Force-refresh now; goes through the single-flight token manager
async fn refresh_token(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    if state.accounts.get_account(&name).is_none() {
        return Err(ApiError::NotFound("Account not found".to_string()));
    }

    let blob = state
        .token_manager
        .get_token(&name, true)
        .await
        .map_err(|e| ApiError::Credential(format!("{:#}", e)))?;

    Ok(Json(ApiResponse {
        success: true,
        message: format!("Token refreshed for '{}'", name),
        data: Some(json!({"expires_at": blob.expires_at})),
    }))
}

/// End-to-end probe: profile discovery plus one tiny chat request
async fn test_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    if state.accounts.get_account(&name).is_none() {
        return Err(ApiError::NotFound("Account not found".to_string()));
    }

    let profile_arn = match state.token_manager.get_profile_arn(&name).await {
        Ok(arn) => Some(arn),
        Err(e) => {
            tracing::warn!("Profile discovery failed for '{}': {:#}", name, e);
            None
        }
    };

    let probe = AnthropicMessagesRequest {
        model: "claude-sonnet-4-20250514".to_string(),
        max_tokens: 100,
        messages: vec![AnthropicMessage {
            role: "user".to_string(),
            content: MessageContent::Text(
                "Say 'Hello! Test successful.' in one line.".to_string(),
            ),
        }],
        ..Default::default()
    };

    match proxy::handle_non_streaming(&state, &name, &probe).await {
        Ok(response) => {
            let ai_response = response
                .content
                .iter()
                .find_map(|block| match block {
                    crate::models::anthropic::ContentBlock::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .unwrap_or_default();

            Ok(Json(ApiResponse {
                success: true,
                message: "Account is working".to_string(),
                data: Some(json!({
                    "profile_arn": profile_arn,
                    "ai_response": ai_response,
                    "model": response.model,
                    "usage": response.usage,
                })),
            }))
        }
        Err(e) => Ok(Json(ApiResponse {
            success: false,
            message: format!("Chat test failed: {}", e),
            data: Some(json!({"profile_arn": profile_arn})),
        })),
    }
}

async fn check_auth() -> Json<Value> {
    Json(json!({"authenticated": true}))
}
