//! Conversation orchestrator: the tool-use loop.
//!
//! States:
//! 1. **AwaitingModel**: send the message list and tool catalog to the
//!    model gateway. A reply that is not a tool request ends the loop.
//! 2. **ExecutingTools**: append the assistant reply (tool_use blocks
//!    intact), run each requested tool sequentially in reply order, append
//!    one user message with one `tool_result` per call, same ids, same order.
//! 3. **Done**: return the final reply unchanged.
//!
//! A failed tool never aborts the turn; it becomes a `tool_result` with
//! `is_error`. Model failures, cancellation, the deadline and the
//! iteration cap do.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::inference::types::{
    ContentBlock, ConversationMessage, ModelRequest, ModelResponse, Role, ToolDefinition,
};
use crate::inference::ModelGateway;
use crate::mcp_client::ToolRegistry;

use super::errors::AgentError;
use super::repository::MetricsCollector;
use super::tokens::clip_with_marker;
use super::types::ToolCallMetric;

// ─── Turn Control ───────────────────────────────────────────────────────────

/// Cancellation and deadline for one turn, threaded from the originating request.
#[derive(Debug, Clone, Default)]
pub struct TurnControl {
    cancel: CancellationToken,
    deadline: Option<tokio::time::Instant>,
}

impl TurnControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(tokio::time::Instant::now() + timeout);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast if the turn is already over.
    pub fn check(&self) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if self
            .deadline
            .is_some_and(|d| tokio::time::Instant::now() >= d)
        {
            return Err(AgentError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run `fut` unless the turn is cancelled or its deadline passes first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, AgentError> {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            _ = deadline => Err(AgentError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

// ─── Loop Types ─────────────────────────────────────────────────────────────

enum LoopState {
    AwaitingModel,
    ExecutingTools(ModelResponse),
    Done(ModelResponse),
}

/// One executed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    pub tool_use_id: String,
    pub tool_name: String,
    pub success: bool,
    pub duration_ms: u64,
}

/// Outcome of a completed loop.
#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    /// The model's final reply, unchanged.
    pub response: ModelResponse,
    /// Every message sent on the last model call.
    pub transcript: Vec<ConversationMessage>,
    pub model_calls: u32,
    pub tool_executions: Vec<ToolExecution>,
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

/// Drives the tool-use loop for one turn at a time. Holds no per-turn state.
pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    registry: Arc<ToolRegistry>,
    metrics: Arc<dyn MetricsCollector>,
    system_prompt: Option<String>,
    max_iterations: u32,
    max_tool_result_bytes: usize,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        registry: Arc<ToolRegistry>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            gateway,
            registry,
            metrics,
            system_prompt: None,
            max_iterations: 25,
            max_tool_result_bytes: 32 * 1024,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Cap on model calls per turn (minimum 1).
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_max_tool_result_bytes(mut self, max: usize) -> Self {
        self.max_tool_result_bytes = max;
        self
    }

    /// Run the loop over `messages` until the model gives a final answer.
    pub async fn run(
        &self,
        mut messages: Vec<ConversationMessage>,
        control: &TurnControl,
    ) -> Result<OrchestrationResult, AgentError> {
        let tools: Vec<ToolDefinition> = self
            .registry
            .tools()
            .iter()
            .map(ToolDefinition::from)
            .collect();

        let mut state = LoopState::AwaitingModel;
        let mut model_calls: u32 = 0;
        let mut executions = Vec::new();

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    control.check()?;
                    if model_calls >= self.max_iterations {
                        tracing::warn!(limit = self.max_iterations, "tool-use loop hit iteration cap");
                        return Err(AgentError::IterationLimit {
                            limit: self.max_iterations,
                        });
                    }
                    model_calls += 1;

                    let request = ModelRequest {
                        system: self.system_prompt.clone(),
                        messages: messages.clone(),
                        tools: tools.clone(),
                        max_tokens: None,
                    };
                    let response = match control.guard(self.gateway.send_message(request)).await? {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                retryable = e.is_retryable(),
                                model_calls,
                                "model call failed, aborting turn"
                            );
                            return Err(e.into());
                        }
                    };

                    if response.wants_tools() {
                        LoopState::ExecutingTools(response)
                    } else {
                        LoopState::Done(response)
                    }
                }

                LoopState::ExecutingTools(response) => {
                    messages.push(response.to_message());

                    let mut results = Vec::new();
                    for (id, name, input) in response.tool_uses() {
                        let (block, execution) =
                            self.execute_tool(id, name, input.clone(), control).await?;
                        results.push(block);
                        executions.push(execution);
                    }

                    messages.push(ConversationMessage::blocks(Role::User, results));
                    LoopState::AwaitingModel
                }

                LoopState::Done(response) => {
                    tracing::debug!(
                        model_calls,
                        tool_calls = executions.len(),
                        stop_reason = ?response.stop_reason,
                        "tool-use loop finished"
                    );
                    return Ok(OrchestrationResult {
                        response,
                        transcript: messages,
                        model_calls,
                        tool_executions: executions,
                    });
                }
            };
        }
    }

    /// Execute one tool call and build its `tool_result` block.
    ///
    /// Only cancellation and the deadline produce `Err`.
    async fn execute_tool(
        &self,
        id: &str,
        name: &str,
        input: serde_json::Value,
        control: &TurnControl,
    ) -> Result<(ContentBlock, ToolExecution), AgentError> {
        let started = Instant::now();
        let outcome = control.guard(self.registry.call_tool(name, input)).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (content, success, error) = match outcome {
            Ok(result) if result.success => (result.text, true, None),
            Ok(result) => (result.text.clone(), false, Some(result.text)),
            Err(e) => (format!("Error: {e}"), false, Some(e.to_string())),
        };

        if success {
            tracing::info!(tool = %name, duration_ms, "tool call succeeded");
        } else {
            tracing::warn!(tool = %name, duration_ms, error = error.as_deref().unwrap_or(""), "tool call failed");
        }

        self.metrics.record_tool_call(&ToolCallMetric {
            tool_name: name.to_string(),
            success,
            duration_ms,
            error,
        });

        let block = ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            content: clip_with_marker(&content, self.max_tool_result_bytes),
            is_error: !success,
        };
        let execution = ToolExecution {
            tool_use_id: id.to_string(),
            tool_name: name.to_string(),
            success,
            duration_ms,
        };
        Ok((block, execution))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
