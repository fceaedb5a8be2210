//! MCP Client: JSON-RPC tool providers over stdio or HTTP.
//!
//! This module handles:
//! - Spawning provider processes / probing HTTP providers
//! - JSON-RPC 2.0 request/response correlation
//! - The `initialize` handshake and tool discovery
//! - Aggregating catalogs and routing tool calls across providers

pub mod client;
pub mod discovery;
pub mod errors;
pub mod registry;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{McpClient, ToolProvider};
pub use errors::McpError;
pub use registry::ToolRegistry;
pub use types::{
    CallToolResult, ClientInfo, McpServersConfig, ServerConfig, ToolCallResult, ToolDescriptor,
};
