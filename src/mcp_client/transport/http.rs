//! JSON-RPC over HTTP transport.
//!
//! Each request is one POST to a fixed endpoint (default `/mcp`). A
//! `GET /health` liveness check runs on `connect()`; no other connection
//! state is held, so calls are independent and may run concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};

use super::{Transport, TransportKind};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::{
    error_codes, HttpServerConfig, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

/// HTTP JSON-RPC transport for one provider.
pub struct HttpTransport {
    server_name: String,
    rpc_url: String,
    health_url: String,
    client: Client,
    healthy: AtomicBool,
}

impl HttpTransport {
    /// Build the transport and its HTTP client. Does not touch the network.
    pub fn new(server_name: &str, config: &HttpServerConfig) -> Result<Self, McpError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json, text/event-stream"),
        );
        for (key, value) in &config.headers {
            let name = header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                McpError::Config {
                    reason: format!("invalid header name '{key}': {e}"),
                }
            })?;
            let val = header::HeaderValue::from_str(value).map_err(|e| McpError::Config {
                reason: format!("invalid header value for '{key}': {e}"),
            })?;
            headers.insert(name, val);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| McpError::Config {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let base = config.url.trim_end_matches('/');
        Ok(Self {
            server_name: server_name.to_string(),
            rpc_url: format!("{base}{}", config.path),
            health_url: format!("{base}{}", config.health_path),
            client,
            healthy: AtomicBool::new(false),
        })
    }

    fn transport_error(&self, reason: impl Into<String>) -> McpError {
        McpError::Transport {
            server: self.server_name.clone(),
            reason: reason.into(),
        }
    }

    fn request_failure(&self, e: reqwest::Error) -> McpError {
        if e.is_timeout() {
            self.transport_error(format!("request timed out: {e}"))
        } else if e.is_connect() {
            self.transport_error(format!("connection refused: {e}"))
        } else {
            self.transport_error(format!("HTTP request failed: {e}"))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn connect(&self) -> Result<(), McpError> {
        let response = self
            .client
            .get(&self.health_url)
            .send()
            .await
            .map_err(|e| self.request_failure(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.transport_error(format!("health check returned HTTP {status}")));
        }

        tracing::info!(server = %self.server_name, url = %self.rpc_url, "http server healthy");
        self.healthy.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(McpError::NotConnected {
                server: self.server_name.clone(),
            });
        }

        let response = self
            .client
            .post(&self.rpc_url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.request_failure(e))?;

        let status = response.status();
        let is_sse = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            tracing::warn!(
                server = %self.server_name,
                status = status.as_u16(),
                method = %request.method,
                "non-2xx response from http server"
            );
            let mut resp = JsonRpcResponse::synthetic_error(
                request.id,
                error_codes::INTERNAL_ERROR,
                format!("HTTP {status}: {}", body.trim()),
            );
            if let Some(err) = resp.error.as_mut() {
                err.data = Some(serde_json::json!({ "status": status.as_u16() }));
            }
            return Ok(resp);
        }

        let parsed = if is_sse {
            find_sse_response(&body, request.id)
        } else {
            match serde_json::from_str::<JsonRpcResponse>(&body) {
                Ok(resp) if resp.answers(request.id) => Some(resp),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(server = %self.server_name, error = %e, "parse error on http body");
                    return Ok(JsonRpcResponse::synthetic_error(
                        request.id,
                        error_codes::PARSE_ERROR,
                        format!("invalid JSON from server: {e}"),
                    ));
                }
            }
        };

        Ok(parsed.unwrap_or_else(|| {
            JsonRpcResponse::synthetic_error(
                request.id,
                error_codes::INTERNAL_ERROR,
                format!("no response with id {} in server reply", request.id),
            )
        }))
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> Result<(), McpError> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(notification)
            .send()
            .await
            .map_err(|e| self.request_failure(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.transport_error(format!(
                "notification '{}' returned HTTP {status}",
                notification.method
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.healthy.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Scan SSE `data:` lines for the response answering `id`.
fn find_sse_response(body: &str, id: u64) -> Option<JsonRpcResponse> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data.trim()).ok())
        .find(|resp| resp.answers(id))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
