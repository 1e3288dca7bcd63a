#![warn(clippy::all)]
#![allow(clippy::pedantic)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relay_common::config::config_path;
use relay_common::logging::init_logging;
use relay_common::{Config, LlmConfig};
use relay_context::{
    ChatRelay, ConversationConfig, History, SqliteStore, Store, TurnRequest, CONFIGS, SESSIONS,
};
use relay_provider::{CompatibleProvider, Provider, ResilienceConfig, ResilientProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod repl;

/// Terminal front-end for the chat relay.
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(version)]
#[command(about = "Chat with a language model while the relay manages the context window.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.chatrelay/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Interactive chat in one conversation
    Chat {
        /// Conversation id; history persists under this id
        #[arg(short, long, default_value = "local")]
        conversation: String,

        /// Nickname reported to the model
        #[arg(short, long, default_value = "noname")]
        name: String,

        /// Locale reported to the model
        #[arg(short, long, default_value = "en")]
        locale: String,

        /// Pretend to be in a public group chat with this name
        #[arg(long)]
        public: Option<String>,
    },

    /// Send a single message and print the answer
    Ask {
        /// Conversation id
        id: String,
        /// Message text
        query: String,
    },

    /// Clear a conversation's history
    Reset {
        /// Conversation id
        id: String,
    },

    /// Print a conversation's stored history
    History {
        /// Conversation id
        id: String,
    },

    /// List models offered by the completion endpoint
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        return init_config(cli.config, force);
    }

    let config = Config::load_with_env(cli.config.as_deref())?;
    init_logging(&config.observability.log_level, &config.observability.log_format);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %config.llm.model,
        base_url = %config.llm.base_url,
        "Starting relay"
    );

    let relay = build_relay(&config).await?;

    match cli.command {
        Commands::Chat {
            conversation,
            name,
            locale,
            public,
        } => {
            let identity = repl::Identity {
                conversation_id: conversation,
                display_name: name,
                locale,
                venue: public,
            };
            repl::run(&relay, &identity).await?;
        }
        Commands::Ask { id, query } => {
            let reply = relay.chat(TurnRequest::new(id, query)).await;
            println!("{}", reply.text);
            if !reply.status.is_answered() {
                bail!("no answer ({})", reply.status.as_str());
            }
        }
        Commands::Reset { id } => {
            relay.reset(&id).await?;
            println!("History of '{id}' cleared.");
        }
        Commands::History { id } => {
            println!("{}", relay.transcript(&id).await?);
        }
        Commands::Models => {
            for model in relay.list_models().await? {
                println!("{model}");
            }
        }
        Commands::Init { .. } => {}
    }

    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(config_path);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save_to(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Primary endpoint first, then every fallback, behind retry and backoff.
fn build_provider(llm: &LlmConfig) -> Arc<dyn Provider> {
    let api_key = llm.api_key.as_deref();
    let primary: Arc<dyn Provider> = if llm.base_url.contains("api.openai.com") {
        Arc::new(CompatibleProvider::openai(api_key))
    } else {
        Arc::new(CompatibleProvider::custom("primary", &llm.base_url, api_key))
    };

    let mut providers = vec![primary];
    for (i, url) in llm.fallback_base_urls.iter().enumerate() {
        let name = format!("fallback-{}", i + 1);
        providers.push(Arc::new(CompatibleProvider::custom(&name, url, api_key)));
    }

    Arc::new(ResilientProvider::new(
        providers,
        ResilienceConfig {
            max_retries: llm.retries,
            base_backoff_ms: llm.backoff_ms,
            ..ResilienceConfig::default()
        },
    ))
}

async fn build_relay(config: &Config) -> Result<ChatRelay> {
    let db_path = config.storage.resolved_path();
    let sessions: SqliteStore<History> = SqliteStore::open(&db_path, SESSIONS)
        .with_context(|| format!("Failed to open history store at {}", db_path.display()))?;
    let configs: SqliteStore<ConversationConfig> = SqliteStore::open(&db_path, CONFIGS)
        .with_context(|| format!("Failed to open config store at {}", db_path.display()))?;

    ensure_healthy(&sessions, "history").await?;
    ensure_healthy(&configs, "config").await?;
    info!(path = %db_path.display(), "Stores ready");

    Ok(ChatRelay::from_config(
        config,
        build_provider(&config.llm),
        Arc::new(sessions),
        Arc::new(configs),
    ))
}

async fn ensure_healthy<V: Send + Sync>(store: &dyn Store<V>, what: &str) -> Result<()> {
    if !store.health_check().await {
        bail!("{what} store ({}) failed its health check", store.name());
    }
    Ok(())
}
