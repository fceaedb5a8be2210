//! ConversationManager: context assembly and rolling summarization.
//!
//! Responsibilities:
//! - Build the per-turn message list:
//!   `[summary pair] + [uncompressed pairs] + [retrieval pair] + [new message]`
//! - Query the document retriever according to the turn's `RagMode`
//! - Fold the oldest exchanges into the single rolling summary once the
//!   uncompressed count reaches the threshold
//!
//! Summary and retrieval context are injected as a user message followed by
//! an assistant acknowledgment, so the model treats them as background it
//! has already seen rather than fresh instructions.

use std::sync::Arc;
use std::time::Instant;

use crate::inference::types::{ConversationMessage, ModelRequest};
use crate::inference::ModelGateway;

use super::errors::AgentError;
use super::orchestrator::TurnControl;
use super::repository::{ChatRepository, DocumentRetriever, MetricsCollector};
use super::tokens;
use super::types::{RagMode, RetrievalMetric, SearchResult, Summary, UncompressedMessage};

// ─── Constants ──────────────────────────────────────────────────────────────

/// System prompt for compaction requests.
pub(crate) const SUMMARY_SYSTEM_PROMPT: &str = "You maintain a running summary of a conversation. \
Rewrite the previous summary and the new exchanges into one concise narrative. \
Keep every fact the user stated, every decision made and every open item. \
The original exchanges will be discarded, so anything you omit is lost.";

/// Completion budget for a compaction request.
const SUMMARY_MAX_TOKENS: u32 = 1_024;

const SUMMARY_PREAMBLE: &str = "Summary of our earlier conversation:";
const SUMMARY_ACK: &str = "Understood. I have the earlier conversation in mind.";
const RAG_PREAMBLE: &str = "Relevant excerpts from the user's documents:";
const RAG_ACK: &str = "Noted. I will use these excerpts where they are relevant.";

/// Stored and replayed in place of a reply that had no text.
pub(crate) const EMPTY_REPLY_TEXT: &str = "(no reply)";

// ─── AssembledContext ───────────────────────────────────────────────────────

/// Output of [`ConversationManager::build_context`].
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub messages: Vec<ConversationMessage>,
    /// Whether a retrieval pair was injected.
    pub rag_used: bool,
    /// Estimated prompt size, excluding system prompt and tools.
    pub estimated_tokens: u32,
}

// ─── ConversationManager ────────────────────────────────────────────────────

/// Builds model context from the repository and keeps it bounded.
pub struct ConversationManager {
    repository: Arc<dyn ChatRepository>,
    gateway: Arc<dyn ModelGateway>,
    retriever: Option<Arc<dyn DocumentRetriever>>,
    metrics: Arc<dyn MetricsCollector>,
    summary_threshold: u32,
    rag_top_k: usize,
}

impl ConversationManager {
    pub fn new(
        repository: Arc<dyn ChatRepository>,
        gateway: Arc<dyn ModelGateway>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            repository,
            gateway,
            retriever: None,
            metrics,
            summary_threshold: 5,
            rag_top_k: 3,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn DocumentRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Override the compaction threshold (minimum 1).
    pub fn with_summary_threshold(mut self, threshold: u32) -> Self {
        self.summary_threshold = threshold.max(1);
        self
    }

    pub fn with_rag_top_k(mut self, top_k: usize) -> Self {
        self.rag_top_k = top_k;
        self
    }

    pub fn repository(&self) -> &Arc<dyn ChatRepository> {
        &self.repository
    }

    // ─── Context Assembly ───────────────────────────────────────────────

    /// Assemble the message list for a new user message.
    pub async fn build_context(
        &self,
        user_id: &str,
        new_message: &str,
        rag_mode: RagMode,
    ) -> Result<AssembledContext, AgentError> {
        let mut messages = Vec::new();

        if let Some(summary) = self.repository.get_summary(user_id).await? {
            messages.push(ConversationMessage::user(format!(
                "{SUMMARY_PREAMBLE}\n{}",
                summary.text
            )));
            messages.push(ConversationMessage::assistant(SUMMARY_ACK));
        }

        for exchange in self.repository.uncompressed_messages(user_id, None).await? {
            messages.push(ConversationMessage::user(exchange.user_text));
            messages.push(ConversationMessage::assistant(non_empty_reply(
                exchange.assistant_text,
            )));
        }

        let rag_context = self.retrieval_context(new_message, rag_mode).await;
        let rag_used = rag_context.is_some();
        if let Some(context) = rag_context {
            messages.push(ConversationMessage::user(context));
            messages.push(ConversationMessage::assistant(RAG_ACK));
        }

        messages.push(ConversationMessage::user(new_message));

        let estimated_tokens = tokens::estimate_context_tokens(&messages);
        tracing::debug!(
            user_id,
            messages = messages.len(),
            estimated_tokens,
            rag_used,
            "context assembled"
        );

        Ok(AssembledContext {
            messages,
            rag_used,
            estimated_tokens,
        })
    }

    /// Formatted retrieval context for `query`, or `None` when nothing usable.
    ///
    /// Never fails: retriever errors are logged and treated as no results.
    pub async fn retrieval_context(&self, query: &str, mode: RagMode) -> Option<String> {
        let threshold = match mode {
            RagMode::Disabled => return None,
            RagMode::Enabled => None,
            RagMode::EnabledWithFiltering { threshold } => Some(threshold),
        };

        let retriever = self.retriever.as_ref()?;
        if !retriever.is_ready() {
            tracing::debug!("retriever not ready, skipping retrieval");
            return None;
        }

        let started = Instant::now();
        let results = match retriever.search(query, self.rag_top_k).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, continuing without context");
                return None;
            }
        };
        let returned = results.len();

        let kept: Vec<SearchResult> = results
            .into_iter()
            .filter(|r| !r.content.trim().is_empty())
            .filter(|r| threshold.map_or(true, |t| r.similarity >= t))
            .collect();

        self.metrics.record_retrieval(&RetrievalMetric {
            duration_ms: started.elapsed().as_millis() as u64,
            results: returned,
            kept: kept.len(),
        });

        if kept.is_empty() {
            tracing::debug!(returned, ?threshold, "no retrieval results kept");
            return None;
        }
        Some(format_search_results(&kept))
    }

    // ─── Summarization ──────────────────────────────────────────────────

    /// Compact the oldest exchanges if the threshold is reached.
    ///
    /// Returns whether a new summary was written.
    pub async fn summarize_if_needed(&self, user_id: &str) -> Result<bool, AgentError> {
        let pending = self.repository.count_uncompressed(user_id).await?;
        if pending < self.summary_threshold {
            return Ok(false);
        }

        let batch = self
            .repository
            .uncompressed_messages(user_id, Some(self.summary_threshold as usize))
            .await?;
        let Some(last) = batch.last() else {
            return Ok(false);
        };
        let position = last.id;

        let previous = self.repository.get_summary(user_id).await?;
        let text = self.compress(previous.as_ref(), &batch).await?;

        let summary = Summary {
            text,
            covered_message_count: previous.map_or(0, |s| s.covered_message_count)
                + batch.len() as u32,
            position,
        };

        // Summary first: a crash before the flag update repeats facts, never loses them.
        self.repository.replace_summary(user_id, &summary).await?;
        let ids: Vec<i64> = batch.iter().map(|m| m.id).collect();
        self.repository.mark_compressed(&ids).await?;

        tracing::info!(
            user_id,
            compressed = ids.len(),
            covered = summary.covered_message_count,
            position,
            "rolling summary updated"
        );
        Ok(true)
    }

    /// [`summarize_if_needed`](Self::summarize_if_needed), with failures
    /// logged instead of returned.
    /// `summarize_if_needed` bounded by the turn's cancel token and deadline.
    ///
    /// Only an interrupted turn is an error; other failures are logged and
    /// leave the history unsummarized.
    pub async fn summarize_or_log(
        &self,
        user_id: &str,
        control: &TurnControl,
    ) -> Result<bool, AgentError> {
        match control.guard(self.summarize_if_needed(user_id)).await? {
            Ok(done) => Ok(done),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "summarization failed, continuing unsummarized");
                Ok(false)
            }
        }
    }

    async fn compress(
        &self,
        previous: Option<&Summary>,
        batch: &[UncompressedMessage],
    ) -> Result<String, AgentError> {
        let request = ModelRequest {
            system: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
            messages: vec![ConversationMessage::user(summary_prompt(previous, batch))],
            tools: Vec::new(),
            max_tokens: Some(SUMMARY_MAX_TOKENS),
        };

        let response = self
            .gateway
            .send_message(request)
            .await
            .map_err(|e| AgentError::Summarization {
                reason: e.to_string(),
            })?;

        let text = response.text().trim().to_string();
        if text.is_empty() {
            return Err(AgentError::Summarization {
                reason: "model returned an empty summary".into(),
            });
        }
        Ok(text)
    }
}

// ─── Formatting ─────────────────────────────────────────────────────────────

/// Assistant turns must carry text; blank replies become the placeholder.
pub(crate) fn non_empty_reply(text: String) -> String {
    if text.trim().is_empty() {
        EMPTY_REPLY_TEXT.to_string()
    } else {
        text
    }
}

fn summary_prompt(previous: Option<&Summary>, batch: &[UncompressedMessage]) -> String {
    let mut prompt = String::new();
    if let Some(previous) = previous {
        prompt.push_str("Previous summary:\n");
        prompt.push_str(&previous.text);
        prompt.push_str("\n\n");
    }
    prompt.push_str("New exchanges:\n");
    for exchange in batch {
        prompt.push_str(&format!(
            "User: {}\nAssistant: {}\n",
            exchange.user_text, exchange.assistant_text
        ));
    }
    prompt.push_str("\nWrite the updated summary.");
    prompt
}

fn format_search_results(results: &[SearchResult]) -> String {
    let mut out = String::from(RAG_PREAMBLE);
    for (i, r) in results.iter().enumerate() {
        let location = match r.location {
            Some((start, end)) => format!(", lines {start}-{end}"),
            None => String::new(),
        };
        out.push_str(&format!(
            "\n\n[{}] {}{} (similarity {:.2})\n{}",
            i + 1,
            r.file_path,
            location,
            r.similarity,
            r.content.trim()
        ));
    }
    out
}

// ─── Tests ──────────────────────────────────────────────────────────────────
