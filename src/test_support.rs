//! Scripted collaborators shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent_core::conversation::SUMMARY_SYSTEM_PROMPT;
use crate::agent_core::errors::AgentError;
use crate::agent_core::repository::DocumentRetriever;
use crate::agent_core::types::SearchResult;
use crate::inference::types::{ContentBlock, ModelRequest, ModelResponse, StopReason, Usage};
use crate::inference::{InferenceError, ModelGateway};
use crate::mcp_client::types::{CallToolResult, ToolContent, ToolDescriptor};
use crate::mcp_client::{McpError, ToolProvider};

// ─── Builders ───────────────────────────────────────────────────────────────

pub(crate) fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        content: vec![ContentBlock::text(text)],
        stop_reason: StopReason::EndTurn,
        usage: Usage::default(),
    }
}

pub(crate) fn tool_use_response(calls: &[(&str, &str, serde_json::Value)]) -> ModelResponse {
    ModelResponse {
        content: calls
            .iter()
            .map(|(id, name, input)| ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: input.clone(),
            })
            .collect(),
        stop_reason: StopReason::ToolUse,
        usage: Usage::default(),
    }
}

pub(crate) fn text_result(text: &str, is_error: bool) -> CallToolResult {
    CallToolResult {
        content: vec![ToolContent::Text {
            text: text.to_string(),
        }],
        is_error,
    }
}

pub(crate) fn search_result(path: &str, similarity: f32, content: &str) -> SearchResult {
    SearchResult {
        similarity,
        file_path: path.to_string(),
        content: content.to_string(),
        location: Some((1, 3)),
    }
}

// ─── ScriptedGateway ────────────────────────────────────────────────────────

/// Replays queued replies in order. Compaction requests are answered with a
/// fixed summary when one is configured and are tracked separately.
pub(crate) struct ScriptedGateway {
    replies: Mutex<VecDeque<Result<ModelResponse, InferenceError>>>,
    summary_text: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ModelRequest>>,
    summary_prompts: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub(crate) fn new(replies: Vec<Result<ModelResponse, InferenceError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            summary_text: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
            summary_prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_summaries(mut self, text: &str) -> Self {
        self.summary_text = Some(text.to_string());
        self
    }

    /// Sleep before answering each request the canned summary does not cover.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Non-summary requests received so far.
    pub(crate) fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn model_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn summary_requests(&self) -> usize {
        self.summary_prompts.lock().unwrap().len()
    }

    pub(crate) fn last_summary_prompt(&self) -> Option<String> {
        self.summary_prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn send_message(&self, request: ModelRequest) -> Result<ModelResponse, InferenceError> {
        let is_summary = request.system.as_deref() == Some(SUMMARY_SYSTEM_PROMPT);
        if is_summary {
            if let Some(text) = &self.summary_text {
                let prompt = request
                    .messages
                    .first()
                    .map(|m| m.text())
                    .unwrap_or_default();
                self.summary_prompts.lock().unwrap().push(prompt);
                return Ok(text_response(text));
            }
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !is_summary {
            self.requests.lock().unwrap().push(request);
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(InferenceError::InvalidResponse {
                    reason: "script exhausted".into(),
                })
            })
    }
}

// ─── FakeProvider ───────────────────────────────────────────────────────────

type CallHandler =
    dyn Fn(&str, &serde_json::Value) -> Result<CallToolResult, McpError> + Send + Sync;

/// In-memory tool provider that records every call.
pub(crate) struct FakeProvider {
    name: String,
    tools: Vec<ToolDescriptor>,
    fail_connect: bool,
    delay: Option<Duration>,
    connected: AtomicBool,
    handler: Box<CallHandler>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeProvider {
    /// Provider exposing `tools`; each call answers `"<tool> ok"`.
    pub(crate) fn new(name: &str, tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tools: tools
                .iter()
                .map(|t| ToolDescriptor {
                    name: t.to_string(),
                    description: format!("{t} from {name}"),
                    input_schema: serde_json::json!({"type": "object", "properties": {}}),
                })
                .collect(),
            fail_connect: false,
            delay: None,
            connected: AtomicBool::new(false),
            handler: Box::new(|tool, _| Ok(text_result(&format!("{tool} ok"), false))),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_tool(mut self, tool: ToolDescriptor) -> Self {
        self.tools.push(tool);
        self
    }

    pub(crate) fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn with_handler(
        mut self,
        handler: impl Fn(&str, &serde_json::Value) -> Result<CallToolResult, McpError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), McpError> {
        if self.fail_connect {
            return Err(McpError::SpawnFailed {
                name: self.name.clone(),
                reason: "no such file or directory".into(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected {
                server: self.name.clone(),
            });
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        (self.handler)(name, &arguments)
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ─── FakeRetriever ──────────────────────────────────────────────────────────

/// Retriever returning a fixed result list and counting queries.
pub(crate) struct FakeRetriever {
    results: Vec<SearchResult>,
    ready: AtomicBool,
    failing: AtomicBool,
    calls: AtomicUsize,
    last_top_k: Mutex<Option<usize>>,
}

impl FakeRetriever {
    pub(crate) fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            ready: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            last_top_k: Mutex::new(None),
        }
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_top_k(&self) -> Option<usize> {
        *self.last_top_k.lock().unwrap()
    }
}

#[async_trait]
impl DocumentRetriever for FakeRetriever {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn search(&self, _query: &str, top_k: usize) -> Result<Vec<SearchResult>, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_top_k.lock().unwrap() = Some(top_k);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AgentError::Retrieval {
                reason: "index unavailable".into(),
            });
        }
        Ok(self.results.iter().take(top_k).cloned().collect())
    }
}
