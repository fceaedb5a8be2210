pub mod agent_core;
pub mod config;
pub mod inference;
pub mod mcp_client;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use agent_core::{
    AgentDatabase, ChatReply, ChatRepository, ChatService, ConversationManager,
    DocumentRetriever, MetricsCollector, Orchestrator, TracingMetrics,
};
use config::RuntimeConfig;
use inference::{MessagesClient, ModelGateway};
use mcp_client::{McpError, ToolRegistry};

/// Return the platform-standard data directory for toolrelay.
///
/// Falls back to `~/.toolrelay/` when the platform directory can't be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("toolrelay");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolrelay")
}

// ─── Tracing ────────────────────────────────────────────────────────────────

const LOG_FILE_NAME: &str = "toolrelay.log";

/// Where [`init_tracing`] sends log output.
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// Human-readable lines on stderr.
    Stderr,
    /// JSON lines appended to `toolrelay.log` in this directory.
    JsonFile(PathBuf),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter (`toolrelay=info,warn`).
pub fn init_tracing(target: LogTarget) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("toolrelay=info,warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match target {
        LogTarget::Stderr => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(subscriber_error)?,
        LogTarget::JsonFile(dir) => {
            let (log_path, file) = open_log_file(&dir)?;
            builder
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
                .map_err(subscriber_error)?;
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                log_file = %log_path.display(),
                pid = std::process::id(),
                "toolrelay logging started"
            );
        }
    }
    Ok(())
}

fn subscriber_error(e: Box<dyn std::error::Error + Send + Sync>) -> anyhow::Error {
    anyhow::anyhow!("failed to install tracing subscriber: {e}")
}

/// Open the log file for appending, creating `dir` if needed.
fn open_log_file(dir: &Path) -> anyhow::Result<(PathBuf, std::fs::File)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log dir {}", dir.display()))?;
    let path = dir.join(LOG_FILE_NAME);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok((path, file))
}

// ─── AgentRuntime ───────────────────────────────────────────────────────────

/// The assembled runtime: tool registry, model gateway, storage and the
/// chat pipeline, with an explicit `create → start → shutdown` lifecycle.
pub struct AgentRuntime {
    config: RuntimeConfig,
    registry: Arc<ToolRegistry>,
    database: Arc<AgentDatabase>,
    chat: ChatService,
}

impl AgentRuntime {
    /// Build every component. Nothing is spawned or contacted yet.
    pub fn create(
        config: RuntimeConfig,
        retriever: Option<Arc<dyn DocumentRetriever>>,
    ) -> anyhow::Result<Self> {
        let servers = config.resolve_servers()?;
        let providers =
            mcp_client::discovery::build_providers(&servers, &config.client_info())?;
        let mut registry = ToolRegistry::new();
        for provider in providers {
            registry.register(provider);
        }
        let registry = Arc::new(registry);

        let db_path = config.database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let database = Arc::new(
            AgentDatabase::open(&db_path.to_string_lossy())
                .with_context(|| format!("failed to open database {}", db_path.display()))?,
        );

        let gateway: Arc<dyn ModelGateway> = Arc::new(MessagesClient::new(config.model.clone())?);
        let metrics: Arc<dyn MetricsCollector> = Arc::new(TracingMetrics);
        let settings = &config.agent;

        let mut conversation = ConversationManager::new(
            database.clone() as Arc<dyn ChatRepository>,
            Arc::clone(&gateway),
            Arc::clone(&metrics),
        )
        .with_summary_threshold(settings.summary_threshold)
        .with_rag_top_k(settings.rag_top_k);
        if let Some(retriever) = retriever {
            conversation = conversation.with_retriever(retriever);
        }

        let orchestrator = Orchestrator::new(gateway, Arc::clone(&registry), Arc::clone(&metrics))
            .with_system_prompt(settings.system_prompt.clone())
            .with_max_iterations(settings.max_iterations)
            .with_max_tool_result_bytes(settings.max_tool_result_bytes);

        let chat = ChatService::new(conversation, orchestrator, metrics)
            .with_turn_timeout(settings.turn_timeout_secs.map(Duration::from_secs));

        tracing::info!(
            model = %config.model.model,
            servers = servers.len(),
            database = %db_path.display(),
            "runtime created"
        );

        Ok(Self {
            config,
            registry,
            database,
            chat,
        })
    }

    /// Connect every tool provider. Failed providers are excluded and returned.
    pub async fn start(&self) -> Vec<(String, McpError)> {
        self.registry.connect_all().await
    }

    /// Process one message with the configured retrieval mode and deadline.
    pub async fn send_message(&self, user_id: &str, text: &str) -> anyhow::Result<ChatReply> {
        let control = self.chat.turn_control();
        let reply = self
            .chat
            .send_message(user_id, text, self.config.agent.rag, &control)
            .await?;
        Ok(reply)
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn database(&self) -> &Arc<AgentDatabase> {
        &self.database
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Disconnect every tool provider.
    pub async fn shutdown(&self) {
        self.registry.disconnect_all().await;
        tracing::info!("runtime shut down");
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
