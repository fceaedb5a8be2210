//! JSON-RPC transports.
//!
//! Two interchangeable implementations sit behind the [`Transport`] trait:
//! - [`StdioTransport`]: newline-delimited JSON over a child process's
//!   stdin/stdout, one exclusive round trip at a time
//! - [`HttpTransport`]: one POST per call to a fixed endpoint, plus a
//!   liveness check before first use
//!
//! Both report payload-level failures (undecodable bodies, non-2xx HTTP
//! statuses) as synthetic JSON-RPC error responses, and connection-level
//! failures as [`McpError`], so callers see one error channel regardless of
//! transport.

use async_trait::async_trait;

use super::errors::McpError;
use super::types::{error_codes, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::{ReadLimits, StdioTransport};

/// Which wire a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

/// A bidirectional JSON-RPC channel to one tool provider.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Establish the channel (spawn the process / check the endpoint).
    async fn connect(&self) -> Result<(), McpError>;

    /// Send one request and return the response carrying the same id.
    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError>;

    /// Send a notification; no response is read.
    async fn notify(&self, notification: &JsonRpcNotification) -> Result<(), McpError>;

    /// Tear the channel down. Idempotent.
    async fn close(&self) -> Result<(), McpError>;
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::Protocol {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::Protocol {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
