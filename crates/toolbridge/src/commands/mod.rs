//! CLI command handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use console::Style;
use toolbridge_config::{ConfigLoader, ToolbridgeConfig};
use toolbridge_mcp::{ConnectionManager, LocalSupervisor, ManagerConfig};

pub mod call;
pub mod connect;
pub mod health;
pub mod servers;
pub mod session;
pub mod tools;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration.
    pub config: ToolbridgeConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// `--dev` given on the command line.
    pub dev_mode: bool,
}

impl Context {
    /// Load configuration and build the context. Config warnings go to the log.
    pub fn load(config_dir: Option<&Path>, json_output: bool, verbose: bool, dev_mode: bool) -> Result<Self> {
        let mut loader = ConfigLoader::new();
        if let Some(dir) = config_dir {
            loader = loader.config_dir(dir);
        }
        let loaded = loader.load();
        for warning in &loaded.warnings {
            tracing::warn!("{}", warning);
        }
        for path in loaded.applied_paths() {
            tracing::debug!(path = %path.display(), "loaded config");
        }

        Ok(Self {
            config: loaded.config,
            json_output,
            verbose,
            dev_mode,
        })
    }

    /// Manager settings: library defaults, then `[client]`, then flags.
    pub fn manager_config(&self) -> ManagerConfig {
        let client = self.config.client();
        let mut config = ManagerConfig::default()
            .with_dev_mode(self.dev_mode || client.dev_mode.unwrap_or(false));

        if let Some(timeout) = client.handshake_timeout() {
            config = config.with_handshake_timeout(timeout);
        }
        if let Some(timeout) = client.discovery_timeout() {
            config = config.with_discovery_timeout(timeout);
        }
        if let Some(timeout) = client.stream_call_timeout() {
            config = config.with_stream_call_timeout(timeout);
        }
        if let Some(timeout) = client.network_call_timeout() {
            config = config.with_network_call_timeout(timeout);
        }
        if let Some(timeout) = client.ping_timeout() {
            config = config.with_ping_timeout(timeout);
        }
        if let Some(name) = client.client_name.clone() {
            config = config.with_client_name(name);
        }
        for (key, value) in client.header_pairs() {
            config = config.with_header(key, value);
        }
        config
    }

    /// A fresh connection manager backed by local processes.
    pub fn manager(&self) -> ConnectionManager {
        let supervisor = LocalSupervisor::new().with_env(self.config.client().env_pairs());
        ConnectionManager::new(self.manager_config(), Arc::new(supervisor))
    }

    /// Resolve a command-line target: a configured server name, or an address.
    ///
    /// Returns the address and, for named servers, the display name.
    pub fn resolve_target(&self, target: &str) -> (String, Option<String>) {
        match self.config.server(target) {
            Ok(server) => (server.address.clone(), Some(server.name.clone())),
            Err(_) => (target.to_string(), None),
        }
    }
}

/// Print a JSON value, pretty.
pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a dimmed line.
pub fn print_dim(msg: &str) {
    println!("{}", Style::new().dim().apply_to(msg));
}

/// Shorten text for table cells.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}
