pub mod chat;
pub mod config_cmd;
pub mod tools;

use mcpchat_config::AppConfig;
use mcpchat_core::error::McpError;
use mcpchat_tools::{McpClient, McpServerSpec};
use std::path::Path;
use std::sync::Arc;

/// Which MCP server to launch, overriding the config file.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ServerArgs {
    /// MCP server executable (name on PATH or a path). `MCPCHAT_MCP_SERVER`
    /// is read by the config layer and keeps the file's args.
    #[arg(long)]
    pub server: Option<String>,

    /// Argument passed to the MCP server; repeat for several
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl ServerArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(server) = &self.server {
            config.mcp.command = server.clone();
            // Args from the file belong to the file's server.
            config.mcp.args.clear();
        }
        if !self.args.is_empty() {
            config.mcp.args = self.args.clone();
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load_with(path).map_err(|e| format!("Failed to load config: {e}").into())
}

/// Spawn the configured server and complete the MCP handshake.
pub async fn connect(config: &AppConfig) -> Result<Arc<McpClient>, McpError> {
    let client = Arc::new(McpClient::spawn(&McpServerSpec::from(&config.mcp))?);
    if let Err(e) = client.initialize().await {
        let _ = client.close().await;
        return Err(e);
    }
    Ok(client)
}
