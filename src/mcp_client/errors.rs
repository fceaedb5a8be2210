//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
///
/// Transport-level failures (`Transport`, `Timeout`, `SpawnFailed`) are fatal
/// to a single provider only. `Protocol` carries an error reported by the
/// peer, or one synthesized locally when a payload could not be decoded.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// I/O failure, closed pipe, refused connection, process exit.
    #[error("transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// The peer did not answer within the read-attempt budget.
    #[error("server '{server}' did not respond after {attempts} read attempts")]
    Timeout { server: String, attempts: u32 },

    /// JSON-RPC error response (peer-reported or synthesized from a parse failure).
    #[error("server error [{code}]: {message}")]
    Protocol {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A payload could not be encoded or decoded locally.
    #[error("parse error: {reason}")]
    Parse { reason: String },

    /// A method other than `initialize` was issued before a successful handshake,
    /// or the owning provider has been disconnected.
    #[error("server '{server}' is not connected")]
    NotConnected { server: String },

    /// Tool not found in the aggregated registry.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Configuration error (missing servers, bad config file).
    #[error("config error: {reason}")]
    Config { reason: String },
}

impl McpError {
    /// Whether this error means the provider itself is unreachable.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            McpError::Transport { .. }
                | McpError::Timeout { .. }
                | McpError::SpawnFailed { .. }
                | McpError::InitFailed { .. }
        )
    }
}
