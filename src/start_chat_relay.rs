//! Startup helpers for the chat relay server.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use crate::conversation::core::config::RelayConfig;
use crate::conversation::storage::SqliteConversationStore;
use crate::llm::GroqCompletionClient;
use crate::server::{self, AppState};

/// Run the server until Ctrl-C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting chat relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e:#}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let port = config.server.port;
    let served = rt.block_on(async move {
        let state = initialize(&config).await?;
        run_server_with_shutdown(state, port, shutdown_signal())
            .await
            .map_err(|e| anyhow::anyhow!(e))
    });

    if let Err(e) = served {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    tracing::info!("Chat relay stopped");
    ExitCode::SUCCESS
}

/// Read configuration from the environment (and `.env`) and validate it.
///
/// # Errors
/// Returns an error if a value is unparseable or required settings are missing.
pub fn load_config() -> anyhow::Result<RelayConfig> {
    let config = RelayConfig::from_env().context("reading configuration")?;
    config.validate().context("validating configuration")?;
    Ok(config)
}

/// Open the store and build application state without starting the server.
///
/// # Errors
/// Returns an error if the database cannot be opened or the completion client cannot be
/// built.
pub async fn initialize(config: &RelayConfig) -> anyhow::Result<Arc<AppState>> {
    let path = &config.storage.sqlite_path;
    let store = SqliteConversationStore::open(path)
        .await
        .with_context(|| format!("opening database {}", path.display()))?;
    tracing::info!("Conversation store: {}", path.display());

    let completion =
        GroqCompletionClient::new(&config.llm).context("building completion client")?;
    tracing::info!("Completion model: {}", completion.model());

    Ok(AppState::new(Arc::new(store), Arc::new(completion)))
}

/// Run server with graceful shutdown.
///
/// # Errors
/// Returns an error if the server fails.
pub async fn run_server_with_shutdown<F>(
    state: Arc<AppState>,
    port: u16,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    server::run_server_with_shutdown(state, port, shutdown_signal).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::core::config::LlmConfig;

    #[tokio::test]
    async fn test_initialize_with_in_memory_path() {
        let mut config = RelayConfig::default();
        config.storage.sqlite_path = ":memory:".into();
        config.llm = LlmConfig {
            api_key: Some("gsk-test".to_string()),
            ..LlmConfig::default()
        };

        let state = initialize(&config).await.unwrap();
        let conversation = state.manager.resolve("c1").await.unwrap();
        assert!(conversation.active);
    }

    #[tokio::test]
    async fn test_initialize_without_api_key_fails() {
        let mut config = RelayConfig::default();
        config.storage.sqlite_path = ":memory:".into();
        assert!(initialize(&config).await.is_err());
    }
}
