//! Token estimates and byte-bounded clipping.
//!
//! Estimates are byte-count heuristics and err high: prose is taken as
//! 3.2 bytes/token, JSON (tool inputs and results) as 2.8.

use crate::inference::types::{ContentBlock, ConversationMessage, MessageContent};

const PROSE_BYTES_PER_TOKEN: f64 = 3.2;
const JSON_BYTES_PER_TOKEN: f64 = 2.8;

/// Role label and separators.
const PER_MESSAGE_TOKENS: u32 = 4;

/// Block framing around a tool_use / tool_result.
const PER_TOOL_BLOCK_TOKENS: u32 = 10;

// ─── Clipping ───────────────────────────────────────────────────────────────

/// Longest prefix of `s` that fits in `max_bytes` and ends on a char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let cut = (0..=max_bytes)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    &s[..cut]
}

/// Clip `text` to `max_bytes`, appending a marker with the original size.
pub fn clip_with_marker(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    format!(
        "{}\n[truncated: {} of {} bytes shown]",
        truncate_utf8(text, max_bytes),
        max_bytes,
        text.len()
    )
}

// ─── Estimation ─────────────────────────────────────────────────────────────

fn bytes_to_tokens(bytes: usize, per_token: f64) -> u32 {
    (bytes as f64 / per_token).ceil() as u32
}

pub fn estimate_tokens(text: &str) -> u32 {
    bytes_to_tokens(text.len(), PROSE_BYTES_PER_TOKEN)
}

pub fn estimate_json_tokens(json_text: &str) -> u32 {
    bytes_to_tokens(json_text.len(), JSON_BYTES_PER_TOKEN)
}

fn estimate_block_tokens(block: &ContentBlock) -> u32 {
    match block {
        ContentBlock::Text { text } => estimate_tokens(text),
        ContentBlock::ToolUse { name, input, .. } => {
            PER_TOOL_BLOCK_TOKENS + estimate_tokens(name) + estimate_json_tokens(&input.to_string())
        }
        ContentBlock::ToolResult { content, .. } => {
            PER_TOOL_BLOCK_TOKENS + estimate_json_tokens(content)
        }
    }
}

pub fn estimate_message_tokens(message: &ConversationMessage) -> u32 {
    PER_MESSAGE_TOKENS
        + match &message.content {
            MessageContent::Text(text) => estimate_tokens(text),
            MessageContent::Blocks(blocks) => blocks.iter().map(estimate_block_tokens).sum(),
        }
}

/// Estimated prompt size of a message list (system prompt and tools excluded).
pub fn estimate_context_tokens(messages: &[ConversationMessage]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
