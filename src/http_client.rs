// Upstream HTTP client with auth retry
//
// One POST per inbound request. A 401/403 answer spends the single retry:
// the account token is force-refreshed and the request replayed once.

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenManager;
use crate::error::ApiError;

pub struct UpstreamClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    tokens: Arc<TokenManager>,

    codewhisperer_url: String,
}

impl UpstreamClient {
    pub fn new(
        tokens: Arc<TokenManager>,
        codewhisperer_url: String,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create upstream HTTP client")?;

        Ok(Self {
            client,
            tokens,
            codewhisperer_url,
        })
    }

    async fn post_once(
        &self,
        access_token: &str,
        body: &serde_json::Value,
    ) -> Result<Response, ApiError> {
        self.client
            .post(&self.codewhisperer_url)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .header("Accept", "application/vnd.amazon.eventstream")
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("CodeWhisperer request failed: {}", e)))
    }

    /// POST generateAssistantResponse for the account. The returned response
    /// may still be non-2xx; callers decide how to surface that.
    pub async fn generate_assistant_response(
        &self,
        account_name: &str,
        body: &serde_json::Value,
    ) -> Result<Response, ApiError> {
        let token = self
            .tokens
            .get_token(account_name, false)
            .await
            .map_err(|e| ApiError::Credential(format!("{:#}", e)))?;

        let response = self.post_once(&token.access_token, body).await?;

        if !matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Ok(response);
        }

        tracing::warn!(
            "Got {} from CodeWhisperer for '{}', refreshing token and retrying...",
            response.status(),
            account_name
        );

        let token = self
            .tokens
            .get_token(account_name, true)
            .await
            .map_err(|e| ApiError::Credential(format!("{:#}", e)))?;

        self.post_once(&token.access_token, body).await
    }
}
