//! tierbot CLI, the main entry point.
//!
//! Commands:
//! - `chat`    Interactive chat or single-message mode
//! - `tools`   List the tools visible at a tier
//! - `config`  Show or initialize configuration
//! - `doctor`  Diagnose configuration and connectivity

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tierbot_config::AppConfig;
use tierbot_core::tier::Tier;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "tierbot",
    about = "tierbot: tier-aware conversational tool dispatch",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.tierbot/config.toml)
    #[arg(short, long, global = true, env = "TIERBOT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat through the dispatch engine
    Chat {
        /// Sender identity used for the tier lookup
        #[arg(short, long, default_value = "local_user")]
        user: String,

        /// Conversation to join (defaults to the user id)
        #[arg(long)]
        conversation: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List the tools available at a tier
    Tools {
        /// free, plus or pro; all tools are listed when omitted
        #[arg(short, long)]
        tier: Option<Tier>,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },

    /// Diagnose configuration and connectivity
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    // `config --init` and `doctor` report a broken config themselves.
    let loaded = AppConfig::load_with_env(&config_path);
    let config = match (&cli.command, loaded) {
        (_, Ok(config)) => Some(config),
        (Commands::Config { init: true } | Commands::Doctor, Err(_)) => None,
        (_, Err(e)) => return Err(format!("Failed to load config: {e}").into()),
    };

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config
            .as_ref()
            .map_or_else(|| "info".to_string(), |c| c.logging.level.clone())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = config.as_ref().is_some_and(|c| c.logging.json);
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Chat {
            user,
            conversation,
            message,
        } => {
            let config = config.unwrap_or_default();
            commands::chat::run(&config, user, conversation, message).await?
        }
        Commands::Tools { tier } => commands::tools::run(&config.unwrap_or_default(), tier)?,
        Commands::Config { init } => commands::config_cmd::run(config, &config_path, init)?,
        Commands::Doctor => commands::doctor::run(&config_path).await?,
    }

    Ok(())
}
