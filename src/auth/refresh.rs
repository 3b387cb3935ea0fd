// Token refresh logic

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::types::TokenBlob;

/// OIDC refresh-token exchange request
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OidcRefreshRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
    refresh_token: &'a str,
}

/// OIDC refresh-token exchange response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OidcRefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Exchange the blob's refresh token for a fresh access token.
///
/// Returns a new blob with `access_token`, `expires_at`, and (when rotated)
/// `refresh_token` overlaid onto the input; every other field is preserved.
pub async fn refresh_blob(client: &Client, refresh_url: &str, blob: &TokenBlob) -> Result<TokenBlob> {
    let client_id = blob
        .client_id
        .as_deref()
        .context("Token blob missing client_id, cannot refresh")?;
    let client_secret = blob
        .client_secret
        .as_deref()
        .context("Token blob missing client_secret, cannot refresh")?;
    if blob.refresh_token.is_empty() {
        bail!("Token blob missing refresh_token, cannot refresh");
    }

    let request = OidcRefreshRequest {
        client_id,
        client_secret,
        grant_type: "refresh_token",
        refresh_token: &blob.refresh_token,
    };

    let response = client
        .post(refresh_url)
        .header("Content-Type", "application/json")
        .json(&request)
        .send()
        .await
        .context("Failed to send token refresh request")?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        tracing::error!("Token refresh failed with status {}: {}", status, body);
        bail!("Token refresh failed: {}", status.as_u16());
    }

    let data: OidcRefreshResponse = response
        .json()
        .await
        .context("Failed to parse token refresh response")?;

    if data.access_token.is_empty() {
        bail!("Token refresh response does not contain accessToken");
    }

    let expires_in = data.expires_in.unwrap_or(3600);
    let expires_at = Utc::now() + Duration::seconds(expires_in);

    let mut refreshed = blob.clone();
    refreshed.access_token = data.access_token;
    refreshed.expires_at = Some(TokenBlob::format_expires_at(expires_at));
    if let Some(rotated) = data.refresh_token {
        refreshed.refresh_token = rotated;
    }

    tracing::info!(
        "Token refreshed, expires: {}",
        refreshed.expires_at.as_deref().unwrap_or("")
    );

    Ok(refreshed)
}
