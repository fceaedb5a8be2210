//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that can occur while processing a user turn.
///
/// Only `Model`, `IterationLimit`, `Cancelled`, `DeadlineExceeded` and
/// repository failures abort a turn. Tool failures never surface here; they
/// become `tool_result` blocks. Retrieval and summarization failures are
/// logged and recovered where they happen.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model gateway failed. Surfaced to the end user.
    #[error("model request failed: {0}")]
    Model(#[from] InferenceError),

    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// The document retriever failed. Reported by `DocumentRetriever`
    /// implementations; the conversation manager logs it and continues.
    #[error("retrieval failed: {reason}")]
    Retrieval { reason: String },

    /// Producing or persisting a rolling summary failed.
    #[error("summarization failed: {reason}")]
    Summarization { reason: String },

    /// The tool-use loop did not reach a final answer in time.
    #[error("no final answer after {limit} model calls")]
    IterationLimit { limit: u32 },

    /// The originating request was cancelled.
    #[error("turn cancelled")]
    Cancelled,

    /// The turn deadline passed.
    #[error("turn deadline exceeded")]
    DeadlineExceeded,
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

