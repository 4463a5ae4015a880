//! `mcpchat config`: Configuration management commands.

use super::load_config;
use mcpchat_config::AppConfig;
use std::path::Path;

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration, secrets redacted
    Show,
    /// Print the config file location
    Path,
    /// Check the configuration for problems
    Validate,
}

pub fn run(config_path: Option<&Path>, action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Show => show(config_path),
        ConfigAction::Path => {
            let path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(AppConfig::config_path);
            println!("{}", path.display());
            Ok(())
        }
        ConfigAction::Validate => validate(config_path),
    }
}

fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    println!("{}", toml::to_string_pretty(&config.redacted())?);
    Ok(())
}

fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ✗ {e}");
            return Err(e);
        }
    };
    println!("   ✓ Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✓ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ! {w}");
        }
    }

    println!();
    println!("   Provider:        {}", config.provider);
    println!("   Model:           {}", config.model);
    println!("   MCP server:      {} {}", config.mcp.command, config.mcp.args.join(" "));
    println!("   Context window:  {} turns", config.memory.window_size);
    println!("   Max iterations:  {}", config.agent.max_iterations);
    Ok(())
}

fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if let Err(e) = config.require_api_key() {
        warnings.push(e.to_string());
    }
    if config.memory.window_size == 0 {
        warnings.push("memory.window_size is 0: the agent will not remember earlier turns".into());
    }
    if config.mcp.command.trim().is_empty() {
        warnings.push("mcp.command is empty".into());
    }
    warnings
}
