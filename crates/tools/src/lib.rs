//! MCP tool provider for mcpchat.
//!
//! Spawns a tool-provider process, speaks the Model Context Protocol to it
//! over stdio, and exposes every tool it advertises as a core [`Tool`].
//!
//! [`Tool`]: mcpchat_core::Tool

pub mod adapter;
pub mod client;
pub mod protocol;

pub use adapter::{McpTool, discover_tools};
pub use client::{McpClient, McpServerSpec};
pub use protocol::{CallToolResult, ContentBlock, InitializeResult, McpToolInfo};
