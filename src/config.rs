//! Runtime configuration: one YAML file.
//!
//! ```yaml
//! model:
//!   model: claude-sonnet-4-5
//!   api_key: ${ANTHROPIC_API_KEY}
//! agent:
//!   summary_threshold: 5
//!   turn_timeout_secs: 600
//! servers_file: servers.json
//! servers:
//!   reminders:
//!     command: python3
//!     args: ["-m", "reminders"]
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are interpolated before parsing; a leading
//! `~` in a default is expanded to the home directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::types::AgentSettings;
use crate::inference::ModelConfig;
use crate::mcp_client::discovery::{load_servers_file, merge_configs};
use crate::mcp_client::types::{ClientInfo, ServerConfig};

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── RuntimeConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    /// Inline servers; these override same-named entries in `servers_file`.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    /// JSON servers file, relative to the config file's directory.
    #[serde(default)]
    pub servers_file: Option<PathBuf>,
    /// Defaults to `agent.db` in the data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Reject settings the runtime cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate().map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })?;
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                reason: "agent.max_iterations must be at least 1".into(),
            });
        }
        if self.agent.summary_threshold == 0 {
            return Err(ConfigError::Invalid {
                reason: "agent.summary_threshold must be at least 1".into(),
            });
        }
        if self.agent.turn_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                reason: "agent.turn_timeout_secs must be positive when set".into(),
            });
        }
        Ok(())
    }

    /// Servers file entries merged with inline entries (inline wins).
    pub fn resolve_servers(&self) -> Result<BTreeMap<String, ServerConfig>, ConfigError> {
        let from_file = match &self.servers_file {
            Some(path) => {
                load_servers_file(path)
                    .map_err(|e| ConfigError::Invalid {
                        reason: e.to_string(),
                    })?
                    .servers
            }
            None => BTreeMap::new(),
        };
        let merged = merge_configs(from_file, self.servers.clone());
        tracing::info!(
            servers = ?merged.keys().collect::<Vec<_>>(),
            "resolved tool servers"
        );
        Ok(merged)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| crate::data_dir().join("agent.db"))
    }

    /// Identity sent in `initialize`.
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            name: self.agent.client_name.clone(),
            version: self.agent.client_version.clone(),
        }
    }
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Load, interpolate, resolve and validate a runtime config file.
pub fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut config: RuntimeConfig =
        serde_yaml::from_str(&interpolate_env_vars(&raw)).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let base = path.parent().unwrap_or(Path::new("."));
    config.servers_file = config
        .servers_file
        .take()
        .map(|p| resolve_path(&p, base));
    config.database_path = config
        .database_path
        .take()
        .map(|p| resolve_path(&p, base));

    config.validate()?;
    tracing::debug!(path = %path.display(), model = %config.model.model, "loaded runtime config");
    Ok(config)
}

/// Expand `~` and anchor relative paths at `base`.
fn resolve_path(path: &Path, base: &Path) -> PathBuf {
    let expanded = PathBuf::from(expand_tilde(&path.to_string_lossy()));
    if expanded.is_relative() {
        base.join(expanded)
    } else {
        expanded
    }
}

// ─── Env Interpolation ──────────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` with environment values.
///
/// Unset variables without a default become empty strings.
pub fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
