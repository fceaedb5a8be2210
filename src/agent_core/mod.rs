//! Agent Core: the conversation side of the runtime.
//!
//! Submodules:
//! - `orchestrator`: The tool-use loop (model call → tools → model call …)
//! - `conversation`: Context assembly, retrieval injection, rolling summary
//! - `chat`: Per-message pipeline tying the two together
//! - `repository`: Collaborator traits (storage, retrieval, metrics)
//! - `database`: SQLite `ChatRepository`
//! - `metrics`: Metric sinks
//! - `tokens`: Token estimation and result clipping
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod chat;
pub mod conversation;
pub mod database;
pub mod errors;
pub mod metrics;
pub mod orchestrator;
pub mod repository;
pub mod tokens;
pub mod types;

// Re-exports for convenience
pub use chat::{ChatReply, ChatService};
pub use conversation::{AssembledContext, ConversationManager};
pub use database::AgentDatabase;
pub use errors::AgentError;
pub use metrics::{InMemoryMetrics, TracingMetrics};
pub use orchestrator::{OrchestrationResult, Orchestrator, ToolExecution, TurnControl};
pub use repository::{ChatRepository, DocumentRetriever, MetricsCollector};
pub use types::{AgentSettings, RagMode, SearchResult, Summary, UncompressedMessage};
