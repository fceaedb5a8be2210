//! Metrics sinks.
//!
//! `TracingMetrics` writes each event as a structured log record under the
//! `toolrelay::metrics` target so any subscriber can route it. `InMemoryMetrics`
//! keeps events for inspection.

use std::sync::Mutex;

use super::repository::MetricsCollector;
use super::types::{MessageMetric, RetrievalMetric, ToolCallMetric};

/// Emits metric events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsCollector for TracingMetrics {
    fn record_tool_call(&self, m: &ToolCallMetric) {
        tracing::info!(
            target: "toolrelay::metrics",
            event = "tool_call",
            tool = %m.tool_name,
            success = m.success,
            duration_ms = m.duration_ms,
            error = m.error.as_deref().unwrap_or(""),
        );
    }

    fn record_retrieval(&self, m: &RetrievalMetric) {
        tracing::info!(
            target: "toolrelay::metrics",
            event = "retrieval",
            duration_ms = m.duration_ms,
            results = m.results,
            kept = m.kept,
        );
    }

    fn record_message_processed(&self, m: &MessageMetric) {
        tracing::info!(
            target: "toolrelay::metrics",
            event = "message_processed",
            user_id = %m.user_id,
            duration_ms = m.duration_ms,
            model_calls = m.model_calls,
            tool_calls = m.tool_calls,
            rag_used = m.rag_used,
        );
    }
}

/// Collects every event in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    tool_calls: Mutex<Vec<ToolCallMetric>>,
    retrievals: Mutex<Vec<RetrievalMetric>>,
    messages: Mutex<Vec<MessageMetric>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool_calls(&self) -> Vec<ToolCallMetric> {
        self.tool_calls.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn retrievals(&self) -> Vec<RetrievalMetric> {
        self.retrievals.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<MessageMetric> {
        self.messages.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn record_tool_call(&self, metric: &ToolCallMetric) {
        if let Ok(mut v) = self.tool_calls.lock() {
            v.push(metric.clone());
        }
    }

    fn record_retrieval(&self, metric: &RetrievalMetric) {
        if let Ok(mut v) = self.retrievals.lock() {
            v.push(metric.clone());
        }
    }

    fn record_message_processed(&self, metric: &MessageMetric) {
        if let Ok(mut v) = self.messages.lock() {
            v.push(metric.clone());
        }
    }
}
