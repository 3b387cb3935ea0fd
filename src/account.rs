// Account service
// Business layer over the store: key generation and token-status decoration

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::types::TokenBlob;
use crate::storage::{Account, AccountUpdate, Storage};

/// Generated keys look like `sk-kiro-<name>-<32 hex>`
pub fn generate_api_key(name: &str) -> String {
    format!("sk-kiro-{}-{}", name, Uuid::new_v4().simple())
}

/// Account as shown in admin listings: store fields plus token status
#[derive(Debug, Serialize)]
pub struct AccountStatus {
    #[serde(flatten)]
    pub account: Account,
    pub has_token: bool,
    pub expires_at: Option<String>,
    pub is_expired: bool,
}

/// Truncated view of a token blob, safe to show in the admin UI
#[derive(Debug, Serialize)]
pub struct TokenPreview {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
    pub client_id_hash: Option<String>,
    pub has_client_credentials: bool,
}

#[derive(Debug, Serialize)]
pub struct AccountDetail {
    #[serde(flatten)]
    pub status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenPreview>,
}

pub struct AccountService {
    storage: Arc<Storage>,
}

impl AccountService {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn list_accounts(&self) -> Vec<AccountStatus> {
        self.storage
            .list_accounts()
            .into_iter()
            .map(|account| self.decorate(account))
            .collect()
    }

    pub fn get_account(&self, name: &str) -> Option<AccountDetail> {
        let account = self.storage.get_account(name)?;
        let token = self.storage.read_token(name).map(|blob| TokenPreview {
            access_token: preview_secret(&blob.access_token),
            refresh_token: preview_secret(&blob.refresh_token),
            expires_at: blob.expires_at.clone(),
            client_id_hash: blob.client_id_hash.clone(),
            has_client_credentials: blob.has_client_credentials(),
        });

        Some(AccountDetail {
            status: self.decorate(account),
            token,
        })
    }

    pub fn create_account(&self, name: &str, api_key: Option<String>) -> Result<Account> {
        let api_key = api_key.unwrap_or_else(|| generate_api_key(name));
        self.storage.create_account(name, &api_key)
    }

    pub fn update_account(&self, name: &str, updates: AccountUpdate) -> Result<Option<Account>> {
        self.storage.update_account(name, updates)
    }

    pub fn delete_account(&self, name: &str) -> Result<bool> {
        self.storage.delete_account(name)
    }

    pub fn toggle_account(&self, name: &str) -> Result<Option<Account>> {
        self.storage.toggle_account(name)
    }

    pub fn save_token(&self, name: &str, blob: &TokenBlob) -> Result<()> {
        self.storage.save_token(name, blob)
    }

    fn decorate(&self, account: Account) -> AccountStatus {
        let (has_token, expires_at, is_expired) = match self.storage.read_token(&account.name) {
            Some(blob) => (true, blob.expires_at.clone(), blob.is_expired()),
            None => (false, None, true),
        };

        AccountStatus {
            account,
            has_token,
            expires_at,
            is_expired,
        }
    }
}

fn preview_secret(secret: &str) -> Option<String> {
    if secret.is_empty() {
        return None;
    }
    let head: String = secret.chars().take(50).collect();
    Some(format!("{}...", head))
}
