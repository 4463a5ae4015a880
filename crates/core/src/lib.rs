//! # mcpchat core
//!
//! Domain types, traits, and error definitions for the mcpchat agent.
//! Every collaborator the chat loop talks to is a trait here:
//! - [`Provider`]: the hosted LLM
//! - [`Tool`]: something the model may call (in practice, MCP tools)
//! - [`ChatMemory`]: the conversation context carried between turns
//!
//! Implementations live in their own crates and depend inward on this one.

pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

pub use error::{AgentError, Error, McpError, MemoryError, ProviderError, Result, ToolError};
pub use memory::{ChatMemory, Turn};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
