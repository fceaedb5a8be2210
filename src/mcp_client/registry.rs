//! Tool registry: aggregates tool catalogs across all tool providers.
//!
//! Provides:
//! - Explicit lifecycle: `register → connect_all → disconnect_all`
//! - One merged catalog in registration order (collisions: last wins)
//! - Tool-name → provider routing for `call_tool`
//! - Required-argument validation against the cached `inputSchema`
//! - Isolation of provider failures: one unreachable provider never
//!   fails the registry

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use futures::future::join_all;

use super::client::ToolProvider;
use super::errors::McpError;
use super::types::{ToolCallResult, ToolDescriptor};

/// Placeholder result text when a tool returns no text content.
const EMPTY_RESULT_TEXT: &str = "(no text output)";

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// Merged view over every connected provider's tools.
#[derive(Debug, Default)]
struct Catalog {
    /// Descriptors in first-seen order.
    tools: Vec<ToolDescriptor>,
    /// `tool_name → owning provider`.
    owners: HashMap<String, String>,
}

impl Catalog {
    fn insert(&mut self, provider: &str, tool: ToolDescriptor) {
        match self.owners.get(&tool.name) {
            Some(previous) => {
                tracing::warn!(
                    tool = %tool.name,
                    previous = %previous,
                    provider = %provider,
                    "tool name collision, later provider wins"
                );
                if let Some(slot) = self.tools.iter_mut().find(|t| t.name == tool.name) {
                    *slot = tool.clone();
                }
            }
            None => self.tools.push(tool.clone()),
        }
        self.owners.insert(tool.name, provider.to_string());
    }

    fn get(&self, name: &str) -> Option<(&str, &ToolDescriptor)> {
        let owner = self.owners.get(name)?;
        let tool = self.tools.iter().find(|t| t.name == name)?;
        Some((owner.as_str(), tool))
    }
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Named tool providers behind one tool namespace.
///
/// Constructed and owned by the caller; shared read-mostly (`Arc`) across
/// conversations once connected.
#[derive(Default)]
pub struct ToolRegistry {
    providers: Vec<Arc<dyn ToolProvider>>,
    connected: RwLock<HashSet<String>>,
    catalog: RwLock<Catalog>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. Pure bookkeeping; nothing is contacted.
    ///
    /// Re-registering a name replaces the earlier provider.
    pub fn register(&mut self, provider: Arc<dyn ToolProvider>) {
        if let Some(slot) = self
            .providers
            .iter_mut()
            .find(|p| p.name() == provider.name())
        {
            tracing::warn!(provider = %provider.name(), "provider re-registered, replacing");
            *slot = provider;
        } else {
            self.providers.push(provider);
        }
    }

    /// Registered provider names, in registration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Names of providers that are currently connected, in registration order.
    pub fn connected_providers(&self) -> Vec<String> {
        let connected = self.connected_set();
        self.providers
            .iter()
            .map(|p| p.name().to_string())
            .filter(|name| connected.contains(name))
            .collect()
    }

    pub fn is_connected(&self, provider: &str) -> bool {
        self.connected_set().contains(provider)
    }

    fn connected_set(&self) -> HashSet<String> {
        self.connected
            .read()
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    fn set_connected(&self, provider: &str, connected: bool) {
        if let Ok(mut set) = self.connected.write() {
            if connected {
                set.insert(provider.to_string());
            } else {
                set.remove(provider);
            }
        }
    }

    fn provider(&self, name: &str) -> Option<&Arc<dyn ToolProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Connect every registered provider concurrently, then build the catalog.
    ///
    /// Failing providers are logged and excluded. Returns the failures,
    /// in registration order.
    pub async fn connect_all(&self) -> Vec<(String, McpError)> {
        let results = join_all(self.providers.iter().map(|p| async move {
            let started = Instant::now();
            let result = p.connect().await;
            (p.name().to_string(), result, started.elapsed().as_millis() as u64)
        }))
        .await;

        let mut failures = Vec::new();
        for (name, result, elapsed_ms) in results {
            match result {
                Ok(()) => {
                    tracing::info!(provider = %name, elapsed_ms, "provider connected");
                    self.set_connected(&name, true);
                }
                Err(e) => {
                    tracing::warn!(provider = %name, error = %e, "provider failed to connect, excluded");
                    self.set_connected(&name, false);
                    failures.push((name, e));
                }
            }
        }

        let tools = self.get_all_tools().await;
        tracing::info!(
            providers = self.connected_providers().len(),
            failed = failures.len(),
            tools = tools.len(),
            "tool registry ready"
        );
        failures
    }

    /// Merged tool catalog of all connected providers.
    ///
    /// Rebuilds the name → provider map as a side effect. A provider whose
    /// listing fails is skipped; a transport failure also marks it
    /// disconnected.
    pub async fn get_all_tools(&self) -> Vec<ToolDescriptor> {
        let connected = self.connected_set();
        let mut catalog = Catalog::default();

        for provider in &self.providers {
            let name = provider.name();
            if !connected.contains(name) {
                continue;
            }
            match provider.list_tools().await {
                Ok(tools) => {
                    for tool in tools {
                        catalog.insert(name, tool);
                    }
                }
                Err(e) => {
                    tracing::warn!(provider = %name, error = %e, "tools/list failed, skipping provider");
                    if e.is_transport_failure() {
                        self.set_connected(name, false);
                    }
                }
            }
        }

        let tools = catalog.tools.clone();
        if let Ok(mut current) = self.catalog.write() {
            *current = catalog;
        }
        tools
    }

    /// Provider that owns `tool_name` in the current catalog.
    pub fn owner_of(&self, tool_name: &str) -> Option<String> {
        self.catalog
            .read()
            .ok()
            .and_then(|c| c.owners.get(tool_name).cloned())
    }

    /// The catalog as of the last `get_all_tools` / `connect_all`, without
    /// contacting any provider.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.catalog
            .read()
            .map(|c| c.tools.clone())
            .unwrap_or_default()
    }

    /// Number of tools in the current catalog.
    pub fn tool_count(&self) -> usize {
        self.catalog.read().map(|c| c.tools.len()).unwrap_or(0)
    }

    /// Route a tool call to its owning provider.
    ///
    /// `Err` for routing failures (unknown tool, provider not connected,
    /// missing required argument, provider unreachable). A tool that ran
    /// and failed, or a peer-reported protocol error, comes back as
    /// `Ok` with `success = false` and a descriptive `text`.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        let (owner, required) = {
            let catalog = self.catalog.read().map_err(|_| McpError::UnknownTool {
                name: tool_name.to_string(),
            })?;
            let (owner, tool) = catalog.get(tool_name).ok_or_else(|| McpError::UnknownTool {
                name: tool_name.to_string(),
            })?;
            let required: Vec<String> = tool
                .required_arguments()
                .into_iter()
                .map(String::from)
                .collect();
            (owner.to_string(), required)
        };

        let provider = match self.provider(&owner) {
            Some(p) if self.is_connected(&owner) => Arc::clone(p),
            _ => return Err(McpError::NotConnected { server: owner }),
        };

        validate_required(tool_name, &required, &arguments)?;

        let started = Instant::now();
        let outcome = provider.call_tool(tool_name, arguments).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                let mut text = result.text();
                if text.is_empty() {
                    text = EMPTY_RESULT_TEXT.to_string();
                }
                tracing::debug!(
                    tool = %tool_name,
                    provider = %owner,
                    is_error = result.is_error,
                    execution_time_ms,
                    "tool call completed"
                );
                Ok(ToolCallResult {
                    tool_name: tool_name.to_string(),
                    success: !result.is_error,
                    text,
                    execution_time_ms,
                })
            }
            Err(McpError::Protocol { code, message, .. }) => {
                tracing::warn!(tool = %tool_name, provider = %owner, code, %message, "tool call rejected");
                Ok(ToolCallResult {
                    tool_name: tool_name.to_string(),
                    success: false,
                    text: format!("[{code}] {message}"),
                    execution_time_ms,
                })
            }
            Err(e) => {
                if e.is_transport_failure() {
                    tracing::warn!(provider = %owner, error = %e, "provider unreachable, marking disconnected");
                    self.set_connected(&owner, false);
                }
                Err(e)
            }
        }
    }

    /// Drop and re-establish one provider, then rebuild the catalog.
    pub async fn reconnect(&self, provider_name: &str) -> Result<(), McpError> {
        let provider = self
            .provider(provider_name)
            .cloned()
            .ok_or_else(|| McpError::Config {
                reason: format!("no provider registered as '{provider_name}'"),
            })?;

        self.set_connected(provider_name, false);
        if let Err(e) = provider.disconnect().await {
            tracing::debug!(provider = %provider_name, error = %e, "disconnect before reconnect failed");
        }

        provider.connect().await?;
        self.set_connected(provider_name, true);
        self.get_all_tools().await;
        tracing::info!(provider = %provider_name, "provider reconnected");
        Ok(())
    }

    /// Disconnect every provider and clear the catalog.
    pub async fn disconnect_all(&self) {
        let results = join_all(self.providers.iter().map(|p| async move {
            (p.name().to_string(), p.disconnect().await)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                tracing::warn!(provider = %name, error = %e, "error during disconnect");
            }
        }

        if let Ok(mut set) = self.connected.write() {
            set.clear();
        }
        if let Ok(mut catalog) = self.catalog.write() {
            *catalog = Catalog::default();
        }
        tracing::info!("all providers disconnected");
    }
}

/// Check that every `required` argument is present in `arguments`.
fn validate_required(
    tool_name: &str,
    required: &[String],
    arguments: &serde_json::Value,
) -> Result<(), McpError> {
    let provided = arguments.as_object();
    for field in required {
        let present = provided.is_some_and(|obj| obj.contains_key(field));
        if !present {
            return Err(McpError::InvalidArguments {
                tool: tool_name.to_string(),
                reason: format!("missing required field: '{field}'"),
            });
        }
    }
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::types::CallToolResult;
    use crate::test_support::{text_result, FakeProvider};
    use std::time::Duration;

    fn registry(providers: Vec<FakeProvider>) -> (ToolRegistry, Vec<Arc<FakeProvider>>) {
        let mut registry = ToolRegistry::new();
        let handles: Vec<Arc<FakeProvider>> = providers.into_iter().map(Arc::new).collect();
        for p in &handles {
            registry.register(Arc::clone(p) as Arc<dyn ToolProvider>);
        }
        (registry, handles)
    }

    #[tokio::test]
    async fn test_failed_provider_is_excluded_not_fatal() {
        let (registry, _) = registry(vec![
            FakeProvider::new("reminders", &["list_reminders"]),
            FakeProvider::new("broken", &["explode"]).failing_connect(),
            FakeProvider::new("files", &["read_file"]),
        ]);

        let failures = registry.connect_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken");

        let names: Vec<String> = registry
            .get_all_tools()
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["list_reminders", "read_file"]);
        assert_eq!(registry.connected_providers(), vec!["reminders", "files"]);
    }

    #[tokio::test]
    async fn test_concurrent_calls_to_distinct_providers_stay_correlated() {
        let echo = |tool: &str, args: &serde_json::Value| -> Result<CallToolResult, McpError> {
            Ok(text_result(&format!("{tool}:{}", args["n"]), false))
        };
        let (registry, handles) = registry(vec![
            FakeProvider::new("calendar", &["list_events"])
                .with_delay(Duration::from_millis(200))
                .with_handler(echo),
            FakeProvider::new("mail", &["search_mail"])
                .with_delay(Duration::from_millis(200))
                .with_handler(echo),
        ]);
        registry.connect_all().await;

        let started = Instant::now();
        let (events, mail) = tokio::join!(
            registry.call_tool("list_events", serde_json::json!({"n": 1})),
            registry.call_tool("search_mail", serde_json::json!({"n": 2})),
        );
        let elapsed = started.elapsed();

        let events = events.unwrap();
        let mail = mail.unwrap();
        assert_eq!(events.tool_name, "list_events");
        assert_eq!(events.text, "list_events:1");
        assert_eq!(mail.tool_name, "search_mail");
        assert_eq!(mail.text, "search_mail:2");
        assert!(events.success && mail.success);

        assert_eq!(handles[0].calls()[0].1["n"], 1);
        assert_eq!(handles[1].calls()[0].1["n"], 2);
        // Both delays overlap when calls are not serialized.
        assert!(elapsed < Duration::from_millis(380), "calls ran serially: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_catalog_preserves_registration_order() {
        let (registry, _) = registry(vec![
            FakeProvider::new("b", &["b1", "b2"]),
            FakeProvider::new("a", &["a1"]),
        ]);
        registry.connect_all().await;
        let names: Vec<String> = registry
            .get_all_tools()
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["b1", "b2", "a1"]);
    }

    #[tokio::test]
    async fn test_name_collision_last_registration_wins() {
        let (registry, handles) = registry(vec![
            FakeProvider::new("first", &["search"]),
            FakeProvider::new("second", &["search"]),
        ]);
        registry.connect_all().await;

        assert_eq!(registry.tool_count(), 1);
        assert_eq!(registry.owner_of("search").as_deref(), Some("second"));

        registry
            .call_tool("search", serde_json::json!({}))
            .await
            .unwrap();
        assert!(handles[0].calls().is_empty());
        assert_eq!(handles[1].calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (registry, _) = registry(vec![FakeProvider::new("reminders", &["list_reminders"])]);
        registry.connect_all().await;
        let err = registry
            .call_tool("delete_everything", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_routes_to_owning_provider() {
        let (registry, handles) = registry(vec![
            FakeProvider::new("reminders", &["list_reminders"]),
            FakeProvider::new("files", &["read_file"]),
        ]);
        registry.connect_all().await;

        let result = registry
            .call_tool("read_file", serde_json::json!({"path": "/tmp/a"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.text, "read_file ok");
        assert!(handles[0].calls().is_empty());
        assert_eq!(handles[1].calls()[0].1["path"], "/tmp/a");
    }

    #[tokio::test]
    async fn test_tool_error_becomes_failed_result() {
        let provider = FakeProvider::new("reminders", &["list_reminders"])
            .with_handler(|_, _| Ok(text_result("list 'work' does not exist", true)));
        let (registry, _) = registry(vec![provider]);
        registry.connect_all().await;

        let result = registry
            .call_tool("list_reminders", serde_json::json!({"list": "work"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.text, "list 'work' does not exist");
    }

    #[tokio::test]
    async fn test_protocol_error_becomes_failed_result() {
        let provider = FakeProvider::new("reminders", &["list_reminders"]).with_handler(|_, _| {
            Err(McpError::Protocol {
                code: -32602,
                message: "invalid params".into(),
                data: None,
            })
        });
        let (registry, _) = registry(vec![provider]);
        registry.connect_all().await;

        let result = registry
            .call_tool("list_reminders", serde_json::json!({}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.text, "[-32602] invalid params");
    }

    #[tokio::test]
    async fn test_missing_required_argument_is_rejected_before_dispatch() {
        let provider = FakeProvider::new("files", &[]).with_tool(ToolDescriptor {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        });
        let (registry, handles) = registry(vec![provider]);
        registry.connect_all().await;

        let err = registry
            .call_tool("read_file", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidArguments { .. }));
        assert!(handles[0].calls().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_disconnects_provider_and_reconnect_restores() {
        let provider = FakeProvider::new("reminders", &["list_reminders"]).with_handler(|_, _| {
            Err(McpError::Transport {
                server: "reminders".into(),
                reason: "pipe closed".into(),
            })
        });
        let (registry, _) = registry(vec![provider]);
        registry.connect_all().await;

        let err = registry
            .call_tool("list_reminders", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transport_failure());
        assert!(!registry.is_connected("reminders"));

        let err = registry
            .call_tool("list_reminders", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected { .. }));

        registry.reconnect("reminders").await.unwrap();
        assert!(registry.is_connected("reminders"));
        assert_eq!(registry.tool_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_all_clears_catalog() {
        let (registry, handles) = registry(vec![FakeProvider::new("reminders", &["list_reminders"])]);
        registry.connect_all().await;
        registry.disconnect_all().await;

        assert_eq!(registry.tool_count(), 0);
        assert!(registry.connected_providers().is_empty());
        assert!(!handles[0].is_connected());
        assert!(registry.get_all_tools().await.is_empty());
    }

    #[test]
    fn test_reregistering_replaces_provider() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeProvider::new("a", &["x"])));
        registry.register(Arc::new(FakeProvider::new("b", &["y"])));
        registry.register(Arc::new(FakeProvider::new("a", &["z"])));
        assert_eq!(registry.provider_names(), vec!["a", "b"]);
    }
}
