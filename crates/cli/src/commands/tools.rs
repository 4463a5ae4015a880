//! `mcpchat tools`: List the tools the MCP server advertises.

use super::{ServerArgs, connect, load_config};
use mcpchat_tools::discover_tools;
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: Option<&Path>, args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config);

    let command = config.mcp.command.clone();
    let client = connect(&config).await.map_err(|e| {
        format!("Failed to create MCP client: {e}. Ensure '{command}' is a valid executable.")
    })?;

    let listed = discover_tools(Arc::clone(&client)).await;
    client.close().await?;
    let registry = listed.map_err(|e| format!("Failed to get tools: {e}"))?;

    println!("{} tools from {command}:", registry.len());
    for def in registry.definitions() {
        if def.description.is_empty() {
            println!("  {}", def.name);
        } else {
            println!("  {:<28} {}", def.name, first_line(&def.description));
        }
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
