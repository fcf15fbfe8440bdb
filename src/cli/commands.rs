use anyhow::Result;
use clap::{Parser, Subcommand};
use notewright_llm::{ConnectionCache, ProviderManager, TelemetrySink};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{self, NotewrightConfig};

use super::chat::{handle_chat, ChatArgs};
use super::config_cmd::{handle_config, ConfigAction};
use super::connection::handle_test_connection;

#[derive(Parser, Debug)]
#[command(name = "notewright", version, about = "LLM writing assistant for Markdown notes")]
pub struct CliArgs {
    /// Path to the configuration file (TOML, or JSON with a .json extension)
    #[arg(long, global = true, env = "NOTEWRIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Provider to use for this run (bedrock, gemini, groq)
    #[arg(long, global = true)]
    pub provider: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask the assistant about a note and apply the edits it proposes
    Chat(ChatArgs),

    /// Probe the configured provider
    TestConnection {
        /// Ignore a cached result
        #[arg(long)]
        force: bool,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Loads the configuration and applies the command-line provider override.
pub fn resolve_config(args: &CliArgs) -> Result<NotewrightConfig> {
    let mut config = config::load_config(args.config.as_deref())?;
    if let Some(provider) = &args.provider {
        config.provider = provider.clone();
    }
    Ok(config)
}

pub fn build_manager(config: &NotewrightConfig, telemetry: Arc<dyn TelemetrySink>) -> ProviderManager {
    let cache = Arc::new(ConnectionCache::new(chrono::Duration::seconds(
        config.connection.cache_duration_secs,
    )));
    ProviderManager::new(config.provider_settings().into_handle(), telemetry, cache)
}

pub async fn handle_command(args: CliArgs) -> Result<()> {
    match &args.command {
        Commands::Chat(chat) => {
            let config = resolve_config(&args)?;
            handle_chat(chat, &config).await
        }
        Commands::TestConnection { force } => {
            let config = resolve_config(&args)?;
            handle_test_connection(&config, *force).await
        }
        Commands::Config { action } => handle_config(action, &args),
    }
}
