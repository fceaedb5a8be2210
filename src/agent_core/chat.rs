//! Per-message pipeline.
//!
//! `send_message` = compaction check → context assembly → tool-use loop →
//! persist the exchange → compaction check → message metric.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;
use uuid::Uuid;

use crate::inference::types::ModelResponse;

use super::conversation::{non_empty_reply, ConversationManager};
use super::errors::AgentError;
use super::orchestrator::{Orchestrator, TurnControl};
use super::repository::MetricsCollector;
use super::types::{MessageMetric, RagMode};

/// Result of one processed user message.
#[derive(Debug, Clone)]
pub struct ChatReply {
    /// Correlates this turn's log lines (`turn` span).
    pub turn_id: Uuid,
    /// Text of the model's final reply, or a placeholder if it had none.
    pub text: String,
    pub response: ModelResponse,
    /// Repository id of the persisted exchange.
    pub message_id: i64,
    pub model_calls: u32,
    pub tool_calls: u32,
    pub rag_used: bool,
}

pub struct ChatService {
    conversation: ConversationManager,
    orchestrator: Orchestrator,
    metrics: Arc<dyn MetricsCollector>,
    turn_timeout: Option<Duration>,
}

impl ChatService {
    pub fn new(
        conversation: ConversationManager,
        orchestrator: Orchestrator,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            conversation,
            orchestrator,
            metrics,
            turn_timeout: None,
        }
    }

    pub fn with_turn_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn conversation(&self) -> &ConversationManager {
        &self.conversation
    }

    /// A fresh control for one turn, carrying the configured deadline.
    pub fn turn_control(&self) -> TurnControl {
        match self.turn_timeout {
            Some(timeout) => TurnControl::new().with_timeout(timeout),
            None => TurnControl::new(),
        }
    }

    /// Process one user message end to end.
    ///
    /// Fails only on model errors, cancellation, the deadline, the iteration
    /// cap or a repository failure. Compaction failures are logged.
    pub async fn send_message(
        &self,
        user_id: &str,
        text: &str,
        rag_mode: RagMode,
        control: &TurnControl,
    ) -> Result<ChatReply, AgentError> {
        let turn_id = Uuid::new_v4();
        let span = tracing::info_span!("turn", %turn_id, user_id);
        self.process(turn_id, user_id, text, rag_mode, control)
            .instrument(span)
            .await
    }

    async fn process(
        &self,
        turn_id: Uuid,
        user_id: &str,
        text: &str,
        rag_mode: RagMode,
        control: &TurnControl,
    ) -> Result<ChatReply, AgentError> {
        let started = Instant::now();

        self.conversation.summarize_or_log(user_id, control).await?;

        let context = self
            .conversation
            .build_context(user_id, text, rag_mode)
            .await?;
        tracing::debug!(
            user_id,
            estimated_tokens = context.estimated_tokens,
            "sending turn to orchestrator"
        );

        let outcome = self.orchestrator.run(context.messages, control).await?;
        let reply_text = non_empty_reply(outcome.response.text());

        let message_id = self
            .conversation
            .repository()
            .save_message(user_id, text, &reply_text)
            .await?;

        // The exchange is already saved; an interrupt here only skips compaction.
        if let Err(e) = self.conversation.summarize_or_log(user_id, control).await {
            tracing::info!(user_id, reason = %e, "post-turn compaction skipped");
        }

        let tool_calls = outcome.tool_executions.len() as u32;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_message_processed(&MessageMetric {
            user_id: user_id.to_string(),
            duration_ms,
            model_calls: outcome.model_calls,
            tool_calls,
            rag_used: context.rag_used,
        });
        tracing::info!(
            user_id,
            message_id,
            model_calls = outcome.model_calls,
            tool_calls,
            duration_ms,
            "message processed"
        );

        Ok(ChatReply {
            turn_id,
            text: reply_text,
            response: outcome.response,
            message_id,
            model_calls: outcome.model_calls,
            tool_calls,
            rag_used: context.rag_used,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::conversation::EMPTY_REPLY_TEXT;
    use crate::agent_core::database::AgentDatabase;
    use crate::agent_core::metrics::InMemoryMetrics;
    use crate::agent_core::repository::{ChatRepository, DocumentRetriever};
    use crate::inference::types::{Role, StopReason, Usage};
    use crate::inference::{InferenceError, ModelGateway};
    use crate::mcp_client::{ToolProvider, ToolRegistry};
    use crate::test_support::{
        search_result, text_response, tool_use_response, FakeProvider, FakeRetriever,
        ScriptedGateway,
    };

    struct Fixture {
        db: Arc<AgentDatabase>,
        gateway: Arc<ScriptedGateway>,
        metrics: Arc<InMemoryMetrics>,
        retriever: Arc<FakeRetriever>,
        service: ChatService,
    }

    async fn fixture(gateway: ScriptedGateway) -> Fixture {
        let db = Arc::new(AgentDatabase::open(":memory:").unwrap());
        let gateway = Arc::new(gateway);
        let metrics = Arc::new(InMemoryMetrics::new());
        let retriever = Arc::new(FakeRetriever::new(vec![search_result(
            "notes/dentist.md",
            0.8,
            "Dentist moved to Thursday.",
        )]));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeProvider::new("reminders", &["list_reminders"]))
            as Arc<dyn ToolProvider>);
        registry.connect_all().await;

        let conversation = ConversationManager::new(
            db.clone() as Arc<dyn ChatRepository>,
            gateway.clone() as Arc<dyn ModelGateway>,
            metrics.clone() as Arc<dyn MetricsCollector>,
        )
        .with_retriever(retriever.clone() as Arc<dyn DocumentRetriever>)
        .with_summary_threshold(5);
        let orchestrator = Orchestrator::new(
            gateway.clone() as Arc<dyn ModelGateway>,
            Arc::new(registry),
            metrics.clone() as Arc<dyn MetricsCollector>,
        );
        let service = ChatService::new(
            conversation,
            orchestrator,
            metrics.clone() as Arc<dyn MetricsCollector>,
        );

        Fixture {
            db,
            gateway,
            metrics,
            retriever,
            service,
        }
    }

    async fn send(f: &Fixture, text: &str) -> Result<ChatReply, AgentError> {
        f.service
            .send_message("alice", text, RagMode::Disabled, &TurnControl::new())
            .await
    }

    #[tokio::test]
    async fn test_simple_question_single_round_trip() {
        let f = fixture(ScriptedGateway::new(vec![Ok(text_response("4"))])).await;

        let reply = send(&f, "2+2?").await.unwrap();
        assert_eq!(reply.text, "4");
        assert_eq!(reply.model_calls, 1);
        assert_eq!(reply.tool_calls, 0);
        assert_eq!(f.gateway.model_calls(), 1);
        assert_eq!(f.db.summary_count("alice").unwrap(), 0);

        let stored = f.db.get_uncompressed("alice", None).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].user_text, "2+2?");
        assert_eq!(stored[0].assistant_text, "4");
        assert_eq!(stored[0].id, reply.message_id);

        let events = f.metrics.messages();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].model_calls, 1);
        assert!(!events[0].rag_used);
    }

    #[tokio::test]
    async fn test_fifth_turn_compacts_and_sixth_starts_fresh() {
        let replies = (0..6).map(|i| Ok(text_response(&format!("a{i}")))).collect();
        let f = fixture(ScriptedGateway::new(replies).with_summaries("the story so far")).await;

        for i in 0..5 {
            send(&f, &format!("q{i}")).await.unwrap();
        }
        assert_eq!(f.db.summary_count("alice").unwrap(), 1);
        assert_eq!(f.db.uncompressed_count("alice").unwrap(), 0);
        assert_eq!(f.gateway.summary_requests(), 1);

        let summary = f.db.load_summary("alice").unwrap().unwrap();
        assert_eq!(summary.covered_message_count, 5);

        send(&f, "q5").await.unwrap();
        assert_eq!(f.db.uncompressed_count("alice").unwrap(), 1);
        assert_eq!(f.db.summary_count("alice").unwrap(), 1);

        let last = f.gateway.requests().last().cloned().unwrap();
        assert!(last.messages[0].text().contains("the story so far"));
    }

    #[tokio::test]
    async fn test_failed_compaction_does_not_fail_turn() {
        let replies = (0..5).map(|i| Ok(text_response(&format!("a{i}")))).collect();
        let f = fixture(ScriptedGateway::new(replies)).await;

        for i in 0..5 {
            let reply = send(&f, &format!("q{i}")).await.unwrap();
            assert_eq!(reply.text, format!("a{i}"));
        }
        assert_eq!(f.db.summary_count("alice").unwrap(), 0);
        assert_eq!(f.db.uncompressed_count("alice").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_tool_turn_reports_counts() {
        let f = fixture(ScriptedGateway::new(vec![
            Ok(tool_use_response(&[(
                "toolu_1",
                "list_reminders",
                serde_json::json!({}),
            )])),
            Ok(text_response("You have one reminder.")),
        ]))
        .await;

        let reply = send(&f, "list my reminders").await.unwrap();
        assert_eq!(reply.model_calls, 2);
        assert_eq!(reply.tool_calls, 1);
        assert_eq!(f.metrics.tool_calls().len(), 1);
        assert_eq!(
            f.db.get_uncompressed("alice", None).unwrap()[0].assistant_text,
            "You have one reminder."
        );
    }

    #[tokio::test]
    async fn test_rag_mode_reaches_retriever() {
        let f = fixture(ScriptedGateway::new(vec![
            Ok(text_response("a")),
            Ok(text_response("b")),
        ]))
        .await;

        send(&f, "when is the dentist?").await.unwrap();
        assert_eq!(f.retriever.calls(), 0);

        let reply = f
            .service
            .send_message("alice", "when is the dentist?", RagMode::Enabled, &TurnControl::new())
            .await
            .unwrap();
        assert!(reply.rag_used);
        assert_eq!(f.retriever.calls(), 1);
    }

    #[tokio::test]
    async fn test_model_error_persists_nothing() {
        let f = fixture(ScriptedGateway::new(vec![Err(InferenceError::Timeout {
            duration_secs: 300,
        })]))
        .await;

        let err = send(&f, "hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Model(_)));
        assert_eq!(f.db.uncompressed_count("alice").unwrap(), 0);
        assert!(f.metrics.messages().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_bounds_pre_turn_compaction() {
        let f = fixture(ScriptedGateway::new(vec![]).with_delay(Duration::from_secs(3))).await;
        for i in 0..5 {
            f.db.insert_message("alice", &format!("q{i}"), "a").unwrap();
        }

        let started = Instant::now();
        let control = TurnControl::new().with_timeout(Duration::from_millis(50));
        let err = f
            .service
            .send_message("alice", "hi", RagMode::Disabled, &control)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(f.gateway.model_calls(), 0);
        assert_eq!(f.db.uncompressed_count("alice").unwrap(), 5);
        assert_eq!(f.db.summary_count("alice").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_turn_skips_compaction() {
        let f = fixture(ScriptedGateway::new(vec![]).with_delay(Duration::from_secs(3))).await;
        for i in 0..5 {
            f.db.insert_message("alice", &format!("q{i}"), "a").unwrap();
        }

        let control = TurnControl::new();
        control.cancel_token().cancel();
        let err = f
            .service
            .send_message("alice", "hi", RagMode::Disabled, &control)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(f.gateway.model_calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_reply_is_stored_as_placeholder() {
        let f = fixture(ScriptedGateway::new(vec![
            Ok(ModelResponse {
                content: vec![],
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            }),
            Ok(text_response("ok")),
        ]))
        .await;

        let first = send(&f, "first").await.unwrap();
        assert_eq!(first.text, EMPTY_REPLY_TEXT);
        assert_eq!(
            f.db.get_uncompressed("alice", None).unwrap()[0].assistant_text,
            EMPTY_REPLY_TEXT
        );

        let second = send(&f, "second").await.unwrap();
        assert_eq!(second.text, "ok");
        let request = f.gateway.requests().last().cloned().unwrap();
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].role, Role::Assistant);
        assert_eq!(request.messages[1].text(), EMPTY_REPLY_TEXT);
    }

    #[tokio::test]
    async fn test_turn_control_carries_deadline() {
        let f = fixture(
            ScriptedGateway::new(vec![Ok(text_response("late"))])
                .with_delay(Duration::from_secs(30)),
        )
        .await;
        let service = f.service.with_turn_timeout(Some(Duration::from_millis(50)));

        let control = service.turn_control();
        let err = service
            .send_message("alice", "hi", RagMode::Disabled, &control)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::DeadlineExceeded));
        assert_eq!(f.db.uncompressed_count("alice").unwrap(), 0);
    }
}
