//! Inference: the model gateway the orchestrator talks to.
//!
//! This module handles:
//! - The `ModelGateway` contract (one request in, one reply out)
//! - Messages-API content types (text / tool_use / tool_result blocks)
//! - An HTTP implementation with timeouts and error mapping
//!
//! Switching providers is a config change or a new `ModelGateway` impl,
//! never an orchestrator change.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{MessagesClient, ModelGateway};
pub use config::ModelConfig;
pub use errors::InferenceError;
pub use types::{
    ContentBlock, ConversationMessage, MessageContent, ModelRequest, ModelResponse, Role,
    StopReason, ToolDefinition, Usage,
};
