//! tsp-gateway: Telegram Session Provisioning Main Binary
//!
//! Usage:
//!   tsp-gateway [serve]     - Provisioning API (+ bot when BOT_TOKEN is set)
//!   tsp-gateway bot         - Bot only, relaying to API_BASE_URL
//!   tsp-gateway gen-key     - Print a new credential encryption key
//!   tsp-gateway --help      - Show help

mod cli;
mod error;

use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tsp_api::AppState;
use tsp_core::{
    AuthProvider, Config, CredentialCipher, CredentialStore, MockAuthProvider,
    MtprotoAuthProvider, ProviderKind, Provisioner, ProvisionerSettings, open_store,
};
use tsp_telegram::{ProvisioningClient, TelegramBot};

use crate::cli::{Cli, Command};
use crate::error::{GatewayError, Result};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.command() == Command::GenKey {
        println!("{}", CredentialCipher::generate_key()?);
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load_from(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting tsp-gateway {}...", env!("CARGO_PKG_VERSION"));

    match cli.command() {
        Command::Serve => run_server(config).await,
        Command::Bot => run_bot_only(config).await,
        Command::GenKey => Ok(()),
    }
}

/// Build the configured auth provider
fn build_provider(config: &Config) -> Arc<dyn AuthProvider> {
    match config.provisioning.provider {
        ProviderKind::Mtproto => Arc::new(MtprotoAuthProvider::new(
            config.telegram.api_id,
            &config.telegram.api_hash,
        )),
        ProviderKind::Mock => {
            tracing::warn!("Using the mock auth provider; issued sessions are not real");
            Arc::new(MockAuthProvider::new("12345"))
        }
    }
}

fn build_bot(config: &Config) -> Result<TelegramBot> {
    config.validate_bot()?;
    let token = config
        .telegram
        .bot_token
        .as_deref()
        .ok_or_else(|| GatewayError::Other("bot token missing".to_string()))?;
    let client = ProvisioningClient::new(&config.api.base_url, config.api.key.clone())?;
    Ok(TelegramBot::new(
        token,
        client,
        config.telegram.admin_user_ids.clone(),
    )?)
}

fn spawn_bot(bot: TelegramBot, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = bot.run(shutdown).await {
            tracing::error!("Telegram bot error: {}", e);
        }
    })
}

/// Run server mode (provisioning API + optional bot)
async fn run_server(config: Config) -> anyhow::Result<()> {
    config.validate_server()?;

    let store: Arc<dyn CredentialStore> = Arc::new(open_store(&config.storage)?);
    tracing::info!("Credential store: {:?}", config.storage.backend);

    let provisioner = Arc::new(Provisioner::new(
        build_provider(&config),
        Arc::clone(&store),
        ProvisionerSettings::from(&config.provisioning),
    ));

    let shutdown = CancellationToken::new();
    let mut service_handles = vec![provisioner.spawn_sweeper(shutdown.clone())];

    // Start the bot if a token is configured
    if config.telegram.bot_token.is_some() {
        let bot = build_bot(&config)?;
        service_handles.push(spawn_bot(bot, shutdown.clone()));
        tracing::info!("Telegram bot started");
    } else {
        tracing::info!("Telegram bot disabled (no token configured)");
    }

    // Start HTTP API server
    let state = AppState {
        provisioner,
        store,
        api_key: config.api.key.clone(),
    };
    let host = config.api.host.clone();
    let port = config.api.port;
    let api_shutdown = shutdown.clone();
    service_handles.push(tokio::spawn(async move {
        if let Err(e) = tsp_api::start_server(&host, port, state, api_shutdown).await {
            tracing::error!("HTTP API error: {}", e);
        }
    }));

    tracing::info!("tsp-gateway initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    wait_for_shutdown(shutdown, service_handles).await
}

/// Run only the bot, talking to a provisioning API elsewhere
async fn run_bot_only(config: Config) -> anyhow::Result<()> {
    let bot = build_bot(&config)?;
    tracing::info!("Relaying to provisioning API at {}", config.api.base_url);

    let shutdown = CancellationToken::new();
    let handles = vec![spawn_bot(bot, shutdown.clone())];
    wait_for_shutdown(shutdown, handles).await
}

async fn wait_for_shutdown(
    shutdown: CancellationToken,
    service_handles: Vec<JoinHandle<()>>,
) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    shutdown.cancel();
    for handle in service_handles {
        if let Err(e) = handle.await {
            tracing::warn!("Service task ended abnormally: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
