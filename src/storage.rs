// Account and token persistence
// JSON files under the data directory; every write goes through a temp file
// followed by a rename so readers only ever see complete documents.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::auth::types::TokenBlob;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub api_key: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Mutable account fields; `name` and `created_at` are immutable after create
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountUpdate {
    pub api_key: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<Account>,
}

pub struct Storage {
    accounts_file: PathBuf,
    tokens_dir: PathBuf,

    // Serializes load-modify-save cycles; plain reads go straight to disk
    write_lock: Mutex<()>,
}

impl Storage {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let tokens_dir = data_dir.join("tokens");
        fs::create_dir_all(&tokens_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let storage = Self {
            accounts_file: data_dir.join("accounts.json"),
            tokens_dir,
            write_lock: Mutex::new(()),
        };

        if !storage.accounts_file.exists() {
            storage.save_accounts(&AccountsFile::default())?;
        }

        Ok(storage)
    }

    fn load_accounts(&self) -> AccountsFile {
        match fs::read(&self.accounts_file) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::error!("Failed to parse accounts file: {}", e);
                AccountsFile::default()
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!("Failed to read accounts file: {}", e);
                }
                AccountsFile::default()
            }
        }
    }

    fn save_accounts(&self, data: &AccountsFile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(data).context("Failed to serialize accounts")?;
        write_atomic(&self.accounts_file, &bytes)
    }

    // ==============================================================================================
    // Account operations
    // ==============================================================================================

    pub fn list_accounts(&self) -> Vec<Account> {
        self.load_accounts().accounts
    }

    pub fn get_account(&self, name: &str) -> Option<Account> {
        self.load_accounts()
            .accounts
            .into_iter()
            .find(|a| a.name == name)
    }

    /// API-key lookup only sees enabled accounts
    pub fn get_account_by_api_key(&self, api_key: &str) -> Option<Account> {
        self.load_accounts()
            .accounts
            .into_iter()
            .find(|a| a.api_key == api_key && a.enabled)
    }

    pub fn create_account(&self, name: &str, api_key: &str) -> Result<Account> {
        validate_account_name(name)?;

        let _guard = self.write_lock.lock().unwrap();
        let mut data = self.load_accounts();

        if data.accounts.iter().any(|a| a.name == name) {
            bail!("Account with name '{}' already exists", name);
        }
        if data.accounts.iter().any(|a| a.api_key == api_key) {
            bail!("API key already in use");
        }

        let now = Utc::now().to_rfc3339();
        let account = Account {
            name: name.to_string(),
            api_key: api_key.to_string(),
            enabled: true,
            created_at: Some(now.clone()),
            updated_at: Some(now),
        };

        data.accounts.push(account.clone());
        self.save_accounts(&data)?;
        Ok(account)
    }

    pub fn update_account(&self, name: &str, updates: AccountUpdate) -> Result<Option<Account>> {
        let _guard = self.write_lock.lock().unwrap();
        let mut data = self.load_accounts();

        let Some(account) = data.accounts.iter_mut().find(|a| a.name == name) else {
            return Ok(None);
        };

        if let Some(api_key) = updates.api_key {
            account.api_key = api_key;
        }
        if let Some(enabled) = updates.enabled {
            account.enabled = enabled;
        }
        account.updated_at = Some(Utc::now().to_rfc3339());

        let updated = account.clone();
        self.save_accounts(&data)?;
        Ok(Some(updated))
    }

    /// Removes the account and its token blob in one operation
    pub fn delete_account(&self, name: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap();
        let mut data = self.load_accounts();

        let before = data.accounts.len();
        data.accounts.retain(|a| a.name != name);
        if data.accounts.len() == before {
            return Ok(false);
        }

        self.save_accounts(&data)?;

        let token_file = self.token_path(name);
        if token_file.exists() {
            fs::remove_file(&token_file)
                .with_context(|| format!("Failed to delete token file for '{}'", name))?;
        }
        Ok(true)
    }

    pub fn toggle_account(&self, name: &str) -> Result<Option<Account>> {
        let Some(account) = self.get_account(name) else {
            return Ok(None);
        };
        self.update_account(
            name,
            AccountUpdate {
                enabled: Some(!account.enabled),
                ..Default::default()
            },
        )
    }

    // ==============================================================================================
    // Token operations
    // ==============================================================================================

    fn token_path(&self, name: &str) -> PathBuf {
        self.tokens_dir.join(format!("{}.json", name))
    }

    pub fn read_token(&self, name: &str) -> Option<TokenBlob> {
        let bytes = fs::read(self.token_path(name)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(blob) => Some(blob),
            Err(e) => {
                tracing::error!("Failed to parse token blob for '{}': {}", name, e);
                None
            }
        }
    }

    pub fn save_token(&self, name: &str, blob: &TokenBlob) -> Result<()> {
        validate_account_name(name)?;
        let bytes = serde_json::to_vec_pretty(blob).context("Failed to serialize token blob")?;
        write_atomic(&self.token_path(name), &bytes)
    }

    pub fn delete_token(&self, name: &str) -> bool {
        fs::remove_file(self.token_path(name)).is_ok()
    }
}

/// Account names become token file names, so restrict them to a safe alphabet
fn validate_account_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Account name must not be empty");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("Account name may only contain letters, digits, '-' and '_'");
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("Invalid file path")?;
    let tmp = path.with_file_name(format!("{}.tmp", file_name));

    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to rename into {}", path.display()))?;
    Ok(())
}
