//! Model gateway contract and the HTTP Messages-API client.
//!
//! The orchestrator only depends on [`ModelGateway`]; [`MessagesClient`]
//! is the bundled implementation that POSTs to `{base_url}/v1/messages`.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};

use super::config::ModelConfig;
use super::errors::InferenceError;
use super::types::{
    ContentBlock, ConversationMessage, ModelRequest, ModelResponse, StopReason, ToolDefinition,
    Usage,
};

// ─── ModelGateway ────────────────────────────────────────────────────────────

/// Sends one request to a language model and returns its reply.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn send_message(&self, request: ModelRequest) -> Result<ModelResponse, InferenceError>;
}

// ─── Wire Types ──────────────────────────────────────────────────────────────

/// Request body for `POST /v1/messages`.
#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [ConversationMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Response body from `POST /v1/messages`.
#[derive(Debug, Deserialize)]
struct MessagesReply {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<StopReason>,
    #[serde(default)]
    usage: Usage,
}

// ─── MessagesClient ──────────────────────────────────────────────────────────

/// HTTP client for a Messages-API compatible endpoint.
pub struct MessagesClient {
    http: HttpClient,
    url: String,
    config: ModelConfig,
}

impl MessagesClient {
    /// Build the client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn new(config: ModelConfig) -> Result<Self, InferenceError> {
        config.validate()?;

        let http = HttpClient::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let url = format!("{}/v1/messages", config.base_url.trim_end_matches('/'));
        Ok(Self { http, url, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn map_send_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.config.request_timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: self.url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ModelGateway for MessagesClient {
    async fn send_message(&self, request: ModelRequest) -> Result<ModelResponse, InferenceError> {
        let body = MessagesBody {
            model: &self.config.model,
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            messages: &request.messages,
            system: request.system.as_deref(),
            tools: &request.tools,
            temperature: self.config.temperature,
        };

        // Log the request metadata (not the full body; it can be huge)
        tracing::info!(
            url = %self.url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.len(),
            max_tokens = body.max_tokens,
            "model request"
        );

        let mut builder = self
            .http
            .post(&self.url)
            .header("anthropic-version", &self.config.api_version)
            .json(&body);
        if !self.config.api_key.is_empty() {
            builder = builder.header("x-api-key", &self.config.api_key);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let reply: MessagesReply =
            serde_json::from_str(&body_text).map_err(|e| InferenceError::InvalidResponse {
                reason: format!("failed to parse messages reply: {e}"),
            })?;

        let response = ModelResponse {
            content: reply.content,
            stop_reason: reply.stop_reason.unwrap_or_default(),
            usage: reply.usage,
        };
        tracing::debug!(
            stop_reason = ?response.stop_reason,
            blocks = response.content.len(),
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "model response"
        );
        Ok(response)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
