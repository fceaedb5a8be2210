//! Model gateway configuration.
//!
//! Lives under the `model:` key of the runtime config. Env-var references
//! (`${ANTHROPIC_API_KEY}`) are resolved by the loader before parsing.

use std::time::Duration;

use serde::Deserialize;

use super::errors::InferenceError;

/// Default Messages API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Messages API version header value.
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Connection and request settings for one model endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub model: String,
    /// Sent as `x-api-key`. Empty means no auth header (local gateways).
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Covers the full generation; size for the longest expected reply.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    300
}

impl ModelConfig {
    /// Minimal config for `model` with every other field defaulted.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: default_base_url(),
            model: model.into(),
            api_key: String::new(),
            api_version: default_api_version(),
            max_tokens: default_max_tokens(),
            temperature: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject configurations that cannot produce a valid request.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.model.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model name is empty".into(),
            });
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(InferenceError::ConfigError {
                reason: format!("base_url must be http(s): '{}'", self.base_url),
            });
        }
        if self.max_tokens == 0 {
            return Err(InferenceError::ConfigError {
                reason: "max_tokens must be positive".into(),
            });
        }
        if let Some(t) = self.temperature {
            if !(0.0..=1.0).contains(&t) {
                return Err(InferenceError::ConfigError {
                    reason: format!("temperature {t} outside 0.0..=1.0"),
                });
            }
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
