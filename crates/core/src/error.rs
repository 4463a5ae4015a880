//! Error types for the mcpchat domain.
//!
//! Each bounded context has its own `thiserror` enum; [`Error`] wraps them all.

use thiserror::Error;

/// The top-level error type for all mcpchat operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    /// Agent errors display without a prefix: the console prints them verbatim.
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    /// The model produced output that could not be turned into a message or
    /// tool call. Carries whatever raw text the provider returned.
    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Response blocked by provider: {0}")]
    Blocked(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors talking to a tool-provider process over MCP.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("transport I/O error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("request '{method}' timed out after {timeout_secs}s")]
    Timeout { method: String, timeout_secs: u64 },

    #[error("connection to MCP server closed")]
    Closed,
}

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("unable to parse agent output: {0}")]
    UnparseableOutput(String),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("agent not finished before max iterations ({max_iterations})")]
    NotFinished { max_iterations: u32 },
}
