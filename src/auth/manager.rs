use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::storage::Storage;

use super::refresh;
use super::types::TokenBlob;

/// Token lifecycle manager
///
/// Holds one mutex per account name; the mutex is the single-flight key, so
/// at most one refresh POST is ever in flight for a given account. Callers
/// that were queued behind a refresh re-evaluate on wake-up and usually skip
/// their own.
pub struct TokenManager {
    storage: Arc<Storage>,
    refresh_url: String,
    profiles_url: String,

    /// HTTP client for refresh and profile discovery (30 s timeout)
    client: Client,

    locks: DashMap<String, Arc<Mutex<()>>>,
    tokens: DashMap<String, TokenBlob>,
    profile_arns: DashMap<String, String>,
}

#[derive(Deserialize)]
struct ProfilesResponse {
    #[serde(default)]
    profiles: Vec<Profile>,
}

#[derive(Deserialize)]
struct Profile {
    #[serde(default)]
    arn: String,
}

impl TokenManager {
    pub fn new(storage: Arc<Storage>, refresh_url: String, profiles_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create auth HTTP client")?;

        Ok(Self {
            storage,
            refresh_url,
            profiles_url,
            client,
            locks: DashMap::new(),
            tokens: DashMap::new(),
            profile_arns: DashMap::new(),
        })
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Get a valid token for the account, refreshing when needed.
    ///
    /// `force` requests a refresh regardless of expiry, but a forcing caller
    /// that was queued behind another refresh observes the token change and
    /// skips its own POST, so N concurrent forced callers produce one refresh.
    pub async fn get_token(&self, name: &str, force: bool) -> Result<TokenBlob> {
        let observed = if force {
            self.storage.read_token(name).map(|b| b.access_token)
        } else {
            None
        };

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let blob = self
            .storage
            .read_token(name)
            .with_context(|| format!("Failed to read token for account: {}", name))?;

        let needs_refresh = if force {
            // Skip when another caller already swapped the token in
            observed.as_deref() == Some(blob.access_token.as_str()) || observed.is_none()
        } else {
            blob.is_expired()
        };

        if !needs_refresh {
            self.tokens.insert(name.to_string(), blob.clone());
            return Ok(blob);
        }

        tracing::info!(
            "Token for {} is expired or force refresh requested, refreshing...",
            name
        );
        let refreshed = refresh::refresh_blob(&self.client, &self.refresh_url, &blob).await?;
        self.storage.save_token(name, &refreshed)?;
        self.tokens.insert(name.to_string(), refreshed.clone());
        tracing::info!("Token refreshed successfully for {}", name);

        Ok(refreshed)
    }

    /// Profile ARN for the account, discovered once and cached for the
    /// lifetime of the process.
    pub async fn get_profile_arn(&self, name: &str) -> Result<String> {
        if let Some(arn) = self.profile_arns.get(name) {
            return Ok(arn.value().clone());
        }

        let token = self.get_token(name, false).await?;

        let response = self
            .client
            .post(&self.profiles_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", token.access_token))
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("Failed to send ListAvailableProfiles request")?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("ListAvailableProfiles failed: {} - {}", status, body);
            bail!("Failed to fetch profile ARN: {}", status.as_u16());
        }

        let data: ProfilesResponse = response
            .json()
            .await
            .context("Failed to parse ListAvailableProfiles response")?;

        let arn = data
            .profiles
            .first()
            .map(|p| p.arn.clone())
            .filter(|arn| !arn.is_empty())
            .with_context(|| format!("No profiles found for account: {}", name))?;

        self.profile_arns.insert(name.to_string(), arn.clone());
        tracing::info!("Fetched profile ARN for {}: {}", name, arn);

        Ok(arn)
    }
}
