//! `mcpchat chat`: Interactive or single-message chat mode.

use super::{ServerArgs, connect, load_config};
use mcpchat_agent::AgentExecutor;
use mcpchat_config::{AppConfig, api_key_env_var};
use mcpchat_console::{describe_error, run_session};
use mcpchat_memory::ConversationWindow;
use mcpchat_tools::discover_tools;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::warn;

#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Model to use (default: gemini-2.5-flash)
    #[arg(long)]
    pub model: Option<String>,

    /// Number of recent turns kept as context
    #[arg(long)]
    pub window: Option<usize>,

    /// Maximum model calls per turn
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    pub message: Option<String>,
}

impl ChatArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        self.server.apply(config);
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(window) = self.window {
            config.memory.window_size = window;
        }
        if let Some(max) = self.max_iterations {
            config.agent.max_iterations = max;
        }
    }
}

pub async fn run(config_path: Option<&Path>, args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config);
    config.validate()?;

    // Check for an API key before spawning anything.
    if let Err(e) = config.require_api_key() {
        eprintln!();
        eprintln!("  ERROR: {e}");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        if api_key_env_var(&config.provider) == "GEMINI_API_KEY" {
            eprintln!("    GEMINI_API_KEY=...    (Google AI Studio key)");
        }
        eprintln!("    MCPCHAT_API_KEY=...   (key for provider '{}')", config.provider);
        eprintln!();
        eprintln!("  Or add api_key to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err(e.into());
    }

    let command = config.mcp.command.clone();
    println!("Attempting to initialize MCP client with executable at {command}...");
    let client = connect(&config).await.map_err(|e| {
        format!("Failed to create MCP client: {e}. Ensure '{command}' is a valid executable.")
    })?;
    println!("Successfully initialized MCP client.");

    let result = chat(&config, args.message, Arc::clone(&client)).await;

    if let Err(e) = client.close().await {
        warn!(error = %e, "Failed to shut down MCP server cleanly");
    }
    result
}

async fn chat(
    config: &AppConfig,
    message: Option<String>,
    client: Arc<mcpchat_tools::McpClient>,
) -> Result<(), Box<dyn std::error::Error>> {
    let tools = discover_tools(client)
        .await
        .map_err(|e| format!("Failed to get tools: {e}"))?;

    let provider = mcpchat_providers::build_from_config(config)
        .map_err(|e| format!("Failed to create LLM provider: {e}"))?;
    println!("Successfully created main agent LLM adapter.");

    let memory = Arc::new(ConversationWindow::new(config.memory.window_size));
    let mut agent = AgentExecutor::new(
        provider,
        &config.model,
        config.temperature,
        Arc::new(tools),
        memory,
    )
    .with_max_iterations(config.agent.max_iterations)
    .with_max_tokens(config.max_tokens);
    if let Some(prompt) = &config.agent.system_prompt {
        agent = agent.with_system_prompt(prompt);
    }

    if let Some(message) = message {
        // Single message mode
        return match agent.run(&message).await {
            Ok(answer) => {
                println!("Agent: {answer}");
                Ok(())
            }
            Err(e) => {
                println!("Agent: {}", describe_error(&e));
                Err(e.into())
            }
        };
    }

    println!("Starting conversational agent. Type 'exit' to quit.");
    println!(
        "Model: {} | Tools: {} | Context window: {} turns",
        config.model,
        agent.tools().len(),
        config.memory.window_size
    );

    let stdin = BufReader::new(tokio::io::stdin());
    run_session(&agent, stdin, tokio::io::stdout()).await?;
    Ok(())
}
