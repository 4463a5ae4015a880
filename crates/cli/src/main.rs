//! mcpchat CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Interactive chat (default) or single-message mode
//! - `tools`: List the tools the MCP server offers
//! - `config`: Show, locate or validate the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::chat::ChatArgs;
use commands::config_cmd::ConfigAction;
use commands::ServerArgs;

#[derive(Parser)]
#[command(
    name = "mcpchat",
    about = "mcpchat: chat with an LLM that can call tools from a local MCP server",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.mcpchat/config.toml
    #[arg(long, global = true, env = "MCPCHAT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent (the default)
    Chat(ChatArgs),

    /// Connect to the MCP server and list its tools
    Tools(ServerArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is the chat transcript.
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command.unwrap_or_else(|| Commands::Chat(ChatArgs::default())) {
        Commands::Chat(args) => commands::chat::run(config_path, args).await?,
        Commands::Tools(args) => commands::tools::run(config_path, args).await?,
        Commands::Config { action } => commands::config_cmd::run(config_path, action)?,
    }

    Ok(())
}
