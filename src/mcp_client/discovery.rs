//! Server configuration loading: read the servers file and build providers.
//!
//! The servers file is JSON (`{"servers": {name: config}}`). Inline servers
//! from the runtime config override file entries of the same name. Relative
//! `cwd` values resolve against the servers file's directory.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::client::{McpClient, ToolProvider};
use super::errors::McpError;
use super::types::{ClientInfo, McpServersConfig, ServerConfig};
use crate::config::interpolate_env_vars;

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load a servers file, interpolating `${VAR}` references first.
pub fn load_servers_file(path: &Path) -> Result<McpServersConfig, McpError> {
    let raw = std::fs::read_to_string(path).map_err(|e| McpError::Config {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let mut config: McpServersConfig =
        serde_json::from_str(&interpolate_env_vars(&raw)).map_err(|e| McpError::Config {
            reason: format!("invalid servers file {}: {e}", path.display()),
        })?;

    if let Some(base) = path.parent() {
        resolve_relative_cwd(&mut config.servers, base);
    }

    tracing::debug!(
        path = %path.display(),
        servers = config.servers.len(),
        "loaded servers file"
    );
    Ok(config)
}

/// Make relative stdio working directories absolute against `base`.
fn resolve_relative_cwd(servers: &mut BTreeMap<String, ServerConfig>, base: &Path) {
    for config in servers.values_mut() {
        if let ServerConfig::Stdio(stdio) = config {
            if let Some(cwd) = stdio.cwd.as_mut() {
                if Path::new(cwd.as_str()).is_relative() {
                    *cwd = base.join(cwd.as_str()).to_string_lossy().into_owned();
                }
            }
        }
    }
}

// ─── Merge ───────────────────────────────────────────────────────────────────

/// Merge inline server entries over file entries.
///
/// Override entries **fully replace** file entries for the same name.
pub fn merge_configs(
    mut base: BTreeMap<String, ServerConfig>,
    overrides: BTreeMap<String, ServerConfig>,
) -> BTreeMap<String, ServerConfig> {
    for (name, config) in overrides {
        if base.contains_key(&name) {
            tracing::debug!(server = %name, "inline server config overrides servers file");
        }
        base.insert(name, config);
    }
    base
}

// ─── Provider Construction ───────────────────────────────────────────────────

/// Build one protocol client per configured server, in name order.
///
/// Nothing is spawned or contacted here; that happens on `connect`.
pub fn build_providers(
    servers: &BTreeMap<String, ServerConfig>,
    client_info: &ClientInfo,
) -> Result<Vec<Arc<dyn ToolProvider>>, McpError> {
    servers
        .iter()
        .map(|(name, config)| {
            let client = McpClient::from_config(name, config, client_info.clone())?;
            Ok(Arc::new(client) as Arc<dyn ToolProvider>)
        })
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
