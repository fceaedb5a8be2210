//! Collaborator seams of the agent core.
//!
//! Persistence, retrieval and observability are owned elsewhere; the
//! assembler and orchestrator only see these traits.

use async_trait::async_trait;

use super::errors::AgentError;
use super::types::{
    MessageMetric, RetrievalMetric, SearchResult, Summary, ToolCallMetric, UncompressedMessage,
};

/// Durable store for exchanges and the rolling summary.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Persist one finished exchange. Returns its row ID.
    async fn save_message(
        &self,
        user_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<i64, AgentError>;

    /// Uncompressed exchanges for `user_id`, oldest first.
    async fn uncompressed_messages(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<UncompressedMessage>, AgentError>;

    async fn count_uncompressed(&self, user_id: &str) -> Result<u32, AgentError>;

    async fn get_summary(&self, user_id: &str) -> Result<Option<Summary>, AgentError>;

    /// Store `summary` as the user's only summary.
    async fn replace_summary(&self, user_id: &str, summary: &Summary) -> Result<(), AgentError>;

    async fn mark_compressed(&self, message_ids: &[i64]) -> Result<(), AgentError>;
}

/// External retrieval engine over the user's documents.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// Whether the index is loaded and queryable.
    fn is_ready(&self) -> bool;

    /// Top `top_k` results for `query`, best first. Failures are
    /// `AgentError::Retrieval`.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, AgentError>;
}

/// Fire-and-forget observability sink.
pub trait MetricsCollector: Send + Sync {
    fn record_tool_call(&self, metric: &ToolCallMetric);

    fn record_retrieval(&self, metric: &RetrievalMetric);

    fn record_message_processed(&self, metric: &MessageMetric);
}
