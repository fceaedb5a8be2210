//! MCP Client: request/response correlation over one transport.
//!
//! Owns a single [`Transport`], assigns monotonically increasing request ids,
//! enforces the `initialize`-first handshake, and exposes the provider
//! capability (`connect / list_tools / call_tool / disconnect`) that the
//! [`ToolRegistry`](super::ToolRegistry) routes through.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::errors::McpError;
use super::transport::{extract_result, HttpTransport, StdioTransport, Transport, TransportKind};
use super::types::{
    CallToolResult, ClientInfo, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, ServerConfig, ServerInfo, ToolDescriptor, ToolsListResult, PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
///
/// Generous because some servers import heavy frameworks at startup.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on `tools/list` pages followed via `nextCursor`.
const MAX_LIST_PAGES: usize = 32;

// ─── ToolProvider ────────────────────────────────────────────────────────────

/// A named source of tools. The registry only ever sees this capability,
/// never the transport behind it.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<(), McpError>;

    /// The provider's tool catalog. Fetched once per connection.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;

    /// Invoke a tool. A tool-level failure is `Ok` with `is_error = true`.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError>;

    async fn disconnect(&self) -> Result<(), McpError>;
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Protocol client for one tool provider.
pub struct McpClient {
    name: String,
    transport: Box<dyn Transport>,
    client_info: ClientInfo,
    next_id: AtomicU64,
    connected: AtomicBool,
    server_info: RwLock<Option<ServerInfo>>,
    tools: Mutex<Option<Vec<ToolDescriptor>>>,
}

impl McpClient {
    /// Wrap an existing transport.
    pub fn new(name: &str, transport: Box<dyn Transport>, client_info: ClientInfo) -> Self {
        Self {
            name: name.to_string(),
            transport,
            client_info,
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            server_info: RwLock::new(None),
            tools: Mutex::new(None),
        }
    }

    /// Build a client with the transport described by `config`.
    pub fn from_config(
        name: &str,
        config: &ServerConfig,
        client_info: ClientInfo,
    ) -> Result<Self, McpError> {
        let transport: Box<dyn Transport> = match config {
            ServerConfig::Stdio(stdio) => Box::new(StdioTransport::new(name, stdio.clone())),
            ServerConfig::Http(http) => Box::new(HttpTransport::new(name, http)?),
        };
        Ok(Self::new(name, transport, client_info))
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Name/version the server reported during `initialize`.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().ok().and_then(|info| info.clone())
    }

    /// Allocate the next request id.
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Issue one JSON-RPC call and return its `result`.
    ///
    /// Any method other than `initialize` fails fast until the handshake
    /// has succeeded.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        if method != "initialize" && !self.is_connected() {
            return Err(McpError::NotConnected {
                server: self.name.clone(),
            });
        }

        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        tracing::debug!(server = %self.name, id = request.id, method, "json-rpc request");
        let response = self.transport.send(&request).await?;
        extract_result(response)
    }

    /// Perform the MCP initialization handshake.
    async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: self.client_info.clone(),
            capabilities: serde_json::json!({}),
        };
        let params = serde_json::to_value(params).map_err(|e| McpError::Parse {
            reason: format!("failed to serialize initialize params: {e}"),
        })?;

        let result = self.request("initialize", Some(params)).await?;
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: self.name.clone(),
            reason: format!("failed to parse initialize response: {e}"),
        })
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: ToolsListResult =
                serde_json::from_value(result).map_err(|e| McpError::Parse {
                    reason: format!("invalid tools/list result from '{}': {e}", self.name),
                })?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(
            server = %self.name,
            pages = MAX_LIST_PAGES,
            "tools/list pagination limit reached, catalog may be incomplete"
        );
        Ok(tools)
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        *self.tools.lock().await = None;

        self.transport.connect().await?;

        let init = match tokio::time::timeout(INIT_TIMEOUT, self.initialize()).await {
            Ok(Ok(init)) => init,
            Ok(Err(e)) => {
                let _ = self.transport.close().await;
                return Err(McpError::InitFailed {
                    name: self.name.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                let _ = self.transport.close().await;
                return Err(McpError::InitFailed {
                    name: self.name.clone(),
                    reason: format!("initialization timed out after {}s", INIT_TIMEOUT.as_secs()),
                });
            }
        };

        if !init.supports_tools() {
            tracing::warn!(server = %self.name, "server did not advertise the tools capability");
        }

        tracing::info!(
            server = %self.name,
            protocol = ?init.protocol_version,
            server_name = ?init.server_info.as_ref().and_then(|s| s.name.clone()),
            "initialized"
        );

        if let Ok(mut info) = self.server_info.write() {
            *info = init.server_info;
        }
        self.connected.store(true, Ordering::SeqCst);

        let initialized = JsonRpcNotification::new("notifications/initialized", None);
        if let Err(e) = self.transport.notify(&initialized).await {
            tracing::debug!(server = %self.name, error = %e, "initialized notification not delivered");
        }

        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut cache = self.tools.lock().await;
        if let Some(tools) = cache.as_ref() {
            return Ok(tools.clone());
        }

        let tools = self.fetch_tools().await?;
        tracing::info!(server = %self.name, count = tools.len(), "fetched tool catalog");
        *cache = Some(tools.clone());
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let result = self.request("tools/call", Some(params)).await?;
        serde_json::from_value(result).map_err(|e| McpError::Parse {
            reason: format!("invalid tools/call result for '{name}': {e}"),
        })
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        *self.tools.lock().await = None;
        self.transport.close().await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
