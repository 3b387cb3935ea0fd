use anyhow::Result;
use std::sync::Arc;

use kiro_proxy::account::AccountService;
use kiro_proxy::auth::TokenManager;
use kiro_proxy::config::Config;
use kiro_proxy::http_client::UpstreamClient;
use kiro_proxy::routes::{self, AppState};
use kiro_proxy::storage::Storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;

    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Kiro Proxy starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    let storage = Arc::new(Storage::new(&config.data_dir)?);
    tracing::info!("Storage initialized at {}", config.data_dir.display());

    let stored = storage.list_accounts();
    tracing::info!(
        "Loaded {} stored account(s), {} static account(s)",
        stored.len(),
        config.static_accounts.len()
    );
    for account in &stored {
        let key_preview: String = account.api_key.chars().take(20).collect();
        tracing::info!("  - {}: {}...", account.name, key_preview);
    }

    let token_manager = Arc::new(TokenManager::new(
        storage.clone(),
        config.refresh_url.clone(),
        config.profiles_url.clone(),
    )?);

    let upstream = Arc::new(UpstreamClient::new(
        token_manager.clone(),
        config.codewhisperer_url.clone(),
        config.upstream_timeout,
    )?);

    let accounts = Arc::new(AccountService::new(storage.clone()));

    let state = AppState {
        config: Arc::new(config.clone()),
        storage,
        accounts,
        token_manager,
        upstream,
    };

    let app = routes::app(state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_startup_banner(&config);
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

fn print_startup_banner(config: &Config) {
    println!();
    println!("============================================================");
    println!("  Kiro Proxy");
    println!("============================================================");
    println!("  Version:  {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:   http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Data dir: {}", config.data_dir.display());
    println!();
    println!("  Endpoints:");
    println!("    POST /v1/messages          - Anthropic Messages proxy");
    println!("    POST /claude/v1/messages   - Anthropic Messages proxy (alias)");
    println!("    GET  /health               - Health check");
    println!("    /admin/*                   - Account management (basic auth)");
    println!("============================================================");
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
