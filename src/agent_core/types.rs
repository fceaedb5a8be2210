//! Shared types for the agent core.
//!
//! Stored conversation records, the rolling summary, retrieval inputs,
//! metric events and the agent settings block.

use serde::{Deserialize, Serialize};

// ─── Stored Conversation ────────────────────────────────────────────────────

/// One persisted user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncompressedMessage {
    /// Auto-incremented row ID (set by DB on insert).
    pub id: i64,
    pub user_id: String,
    pub user_text: String,
    pub assistant_text: String,
    /// Set once the exchange has been folded into the rolling summary.
    pub compressed: bool,
    /// ISO 8601 timestamp.
    pub created_at: String,
}

/// The single rolling summary for a user. Replaced, never appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    /// Total exchanges folded into this summary across all compactions.
    pub covered_message_count: u32,
    /// Row ID of the newest exchange covered.
    pub position: i64,
}

// ─── Retrieval ──────────────────────────────────────────────────────────────

/// Whether and how to inject retrieved snippets into the context.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RagMode {
    #[default]
    Disabled,
    Enabled,
    /// Keep only results with similarity at or above `threshold`.
    EnabledWithFiltering { threshold: f32 },
}

/// One retrieval hit, owned by the external retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub similarity: f32,
    pub file_path: String,
    pub content: String,
    /// Line span `(start, end)` within the file, when known.
    #[serde(default)]
    pub location: Option<(u32, u32)>,
}

// ─── Metric Events ──────────────────────────────────────────────────────────

/// Emitted once per tool execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallMetric {
    pub tool_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Emitted once per retriever query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalMetric {
    pub duration_ms: u64,
    /// Results returned by the retriever.
    pub results: usize,
    /// Results kept after similarity filtering.
    pub kept: usize,
}

/// Emitted once per completed user message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageMetric {
    pub user_id: String,
    pub duration_ms: u64,
    pub model_calls: u32,
    pub tool_calls: u32,
    pub rag_used: bool,
}

// ─── Settings ───────────────────────────────────────────────────────────────

/// Agent behaviour knobs (the `agent:` block of the runtime config).
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// Model calls allowed per turn before giving up.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Uncompressed exchanges that trigger a compaction.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: u32,
    #[serde(default = "default_rag_top_k")]
    pub rag_top_k: usize,
    #[serde(default)]
    pub rag: RagMode,
    /// Whole-turn deadline. `None` disables it.
    #[serde(default)]
    pub turn_timeout_secs: Option<u64>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Tool results longer than this are clipped before reaching the model.
    #[serde(default = "default_max_tool_result_bytes")]
    pub max_tool_result_bytes: usize,
    /// Identity sent in `initialize`.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_summary_threshold() -> u32 {
    5
}
fn default_rag_top_k() -> usize {
    3
}
fn default_max_tool_result_bytes() -> usize {
    32 * 1024
}
fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}
fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            summary_threshold: default_summary_threshold(),
            rag_top_k: default_rag_top_k(),
            rag: RagMode::default(),
            turn_timeout_secs: None,
            system_prompt: None,
            max_tool_result_bytes: default_max_tool_result_bytes(),
            client_name: default_client_name(),
            client_version: default_client_version(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
