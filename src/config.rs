// Configuration module
// Loads and validates configuration from CLI args, environment variables, and defaults

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Kiro Proxy - Anthropic Messages proxy for AWS CodeWhisperer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT")]
    pub port: Option<u16>,

    /// Data directory for accounts and token blobs
    #[arg(short, long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Account declared directly in configuration rather than the store.
/// Its token blob still lives under the data directory, keyed by name.
#[derive(Clone, Debug, Deserialize)]
pub struct StaticAccount {
    pub name: String,
    pub api_key: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Persistence
    pub data_dir: PathBuf,

    // Upstream endpoints
    pub codewhisperer_url: String,
    pub profiles_url: String,
    pub refresh_url: String,

    // Model alias table; unknown names pass through unchanged
    pub model_mapping: HashMap<String, String>,

    // Accounts declared in configuration (checked after the store)
    pub static_accounts: Vec<StaticAccount>,

    // Admin surface credentials
    pub admin_username: String,
    pub admin_password: String,

    // Timeouts (seconds)
    pub upstream_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    fn from_args(args: CliArgs) -> Result<Self> {
        let config = Config {
            server_host: args
                .host
                .or_else(|| std::env::var("SERVER_HOST").ok())
                .unwrap_or_else(|| "0.0.0.0".to_string()),

            server_port: args
                .port
                .or_else(|| std::env::var("SERVER_PORT").ok().and_then(|s| s.parse().ok()))
                .unwrap_or(8080),

            data_dir: args
                .data_dir
                .or_else(|| std::env::var("DATA_DIR").ok().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("./data")),

            codewhisperer_url: std::env::var("CODEWHISPERER_URL").unwrap_or_else(|_| {
                "https://q.us-east-1.amazonaws.com/generateAssistantResponse".to_string()
            }),

            profiles_url: std::env::var("PROFILES_URL").unwrap_or_else(|_| {
                "https://q.us-east-1.amazonaws.com/ListAvailableProfiles".to_string()
            }),

            refresh_url: std::env::var("REFRESH_URL")
                .unwrap_or_else(|_| "https://oidc.us-east-1.amazonaws.com/token".to_string()),

            model_mapping: load_model_mapping()?,

            static_accounts: load_static_accounts()?,

            admin_username: std::env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),

            admin_password: std::env::var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| "admin123".to_string()),

            upstream_timeout: std::env::var("UPSTREAM_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120),

            log_level: args
                .log_level
                .or_else(|| std::env::var("LOG_LEVEL").ok())
                .unwrap_or_else(|| "info".to_string()),
        };

        Ok(config)
    }

    /// Map a model alias to its upstream model id; unknown names pass through
    pub fn map_model(&self, model: &str) -> String {
        self.model_mapping
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }

    /// Find a static account by API key
    pub fn static_account_by_api_key(&self, api_key: &str) -> Option<&StaticAccount> {
        self.static_accounts.iter().find(|a| a.api_key == api_key)
    }
}

/// Parse MODEL_MAPPING as a JSON object, or read MODEL_MAPPING_FILE
fn load_model_mapping() -> Result<HashMap<String, String>> {
    if let Ok(raw) = std::env::var("MODEL_MAPPING") {
        if !raw.trim().is_empty() {
            return serde_json::from_str(&raw).context("MODEL_MAPPING is not a valid JSON object");
        }
    }

    if let Ok(path) = std::env::var("MODEL_MAPPING_FILE") {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read MODEL_MAPPING_FILE: {}", path))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("MODEL_MAPPING_FILE is not a valid JSON object: {}", path));
    }

    Ok(HashMap::new())
}

/// Read STATIC_ACCOUNTS_FILE, a JSON array of {name, api_key}
fn load_static_accounts() -> Result<Vec<StaticAccount>> {
    let Ok(path) = std::env::var("STATIC_ACCOUNTS_FILE") else {
        return Ok(Vec::new());
    };

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read STATIC_ACCOUNTS_FILE: {}", path))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("STATIC_ACCOUNTS_FILE is not a valid account list: {}", path))
}
