//! Exposes MCP server tools through the core `Tool` trait.

use crate::client::McpClient;
use crate::protocol::McpToolInfo;
use async_trait::async_trait;
use mcpchat_core::error::{McpError, ToolError};
use mcpchat_core::tool::{Tool, ToolRegistry, ToolResult};
use std::sync::Arc;
use tracing::{debug, info};

/// One tool offered by an MCP server.
pub struct McpTool {
    client: Arc<McpClient>,
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, info: McpToolInfo) -> Self {
        Self {
            client,
            description: info.description.unwrap_or_default(),
            name: info.name,
            input_schema: info.input_schema,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        debug!(tool = %self.name, "Calling MCP tool");

        let result = self
            .client
            .call_tool(&self.name, arguments)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(ToolResult {
            call_id: String::new(),
            success: !result.is_error,
            output: result.text(),
            data: None,
        })
    }
}

/// Ask the server for its tools and register each one.
pub async fn discover_tools(client: Arc<McpClient>) -> Result<ToolRegistry, McpError> {
    let tools = client.list_tools().await?;
    let mut registry = ToolRegistry::new();
    for info in tools {
        registry.register(Box::new(McpTool::new(Arc::clone(&client), info)));
    }
    info!(count = registry.len(), tools = ?registry.names(), "Discovered MCP tools");
    Ok(registry)
}
