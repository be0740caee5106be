//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [client]
//! dev_mode = false
//! handshake_timeout_ms = 3000
//! network_call_timeout_ms = 30000
//! headers = [["Authorization", "Bearer ..."]]
//! env = [["RUST_LOG", "info"]]
//!
//! [[server]]
//! name = "sqlite"
//! address = "mcp-server-sqlite --db /tmp/app.db"
//!
//! [[server]]
//! name = "search"
//! address = "https://tools.example.com/mcp"
//! enabled = false
//! ```

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolbridgeConfig {
    /// Client settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSection>,

    /// Named endpoints (`[[server]]` tables).
    #[serde(rename = "server", skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerEntry>,
}

impl ToolbridgeConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Client fields are merged one by one. Servers are matched by name:
    /// a later entry replaces an earlier one, new names are appended.
    pub fn merge(&mut self, other: ToolbridgeConfig) {
        if let Some(over) = other.client {
            match self.client.as_mut() {
                Some(base) => base.merge(over),
                None => self.client = Some(over),
            }
        }

        for server in other.servers {
            match self.servers.iter_mut().find(|s| s.name == server.name) {
                Some(existing) => *existing = server,
                None => self.servers.push(server),
            }
        }
    }

    /// Reject empty names and addresses, and duplicate server names.
    pub fn validate(&self) -> crate::Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "server.name".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
            if server.address.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: format!("server.{}.address", server.name),
                    reason: "must not be empty".to_string(),
                });
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::Invalid {
                    field: format!("server.{}", server.name),
                    reason: "duplicate server name".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Client settings, or defaults when the section is absent.
    pub fn client(&self) -> ClientSection {
        self.client.clone().unwrap_or_default()
    }

    /// Look up a server by name.
    pub fn server(&self, name: &str) -> crate::Result<&ServerEntry> {
        self.servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::ServerNotFound(name.to_string()))
    }

    /// Servers with `enabled = true`, in file order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerEntry> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client Section
// ─────────────────────────────────────────────────────────────────────────────

/// The `[client]` section.
///
/// Timeouts are in milliseconds. Unset values fall back to the library
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Allow loop-back and private network addresses.
    pub dev_mode: Option<bool>,
    /// Name announced to endpoints during the handshake.
    pub client_name: Option<String>,
    /// Handshake timeout.
    pub handshake_timeout_ms: Option<u64>,
    /// Tool discovery timeout.
    pub discovery_timeout_ms: Option<u64>,
    /// Tool call timeout on subprocess endpoints.
    pub stream_call_timeout_ms: Option<u64>,
    /// Tool call timeout on HTTP endpoints.
    pub network_call_timeout_ms: Option<u64>,
    /// Health check timeout.
    pub ping_timeout_ms: Option<u64>,
    /// HTTP headers (as [key, value] pairs).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<[String; 2]>,
    /// Environment variables for spawned processes (as [key, value] pairs).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<[String; 2]>,
}

impl ClientSection {
    fn merge(&mut self, other: ClientSection) {
        override_with(&mut self.dev_mode, other.dev_mode);
        override_with(&mut self.client_name, other.client_name);
        override_with(&mut self.handshake_timeout_ms, other.handshake_timeout_ms);
        override_with(&mut self.discovery_timeout_ms, other.discovery_timeout_ms);
        override_with(&mut self.stream_call_timeout_ms, other.stream_call_timeout_ms);
        override_with(&mut self.network_call_timeout_ms, other.network_call_timeout_ms);
        override_with(&mut self.ping_timeout_ms, other.ping_timeout_ms);
        if !other.headers.is_empty() {
            self.headers = other.headers;
        }
        if !other.env.is_empty() {
            self.env = other.env;
        }
    }

    /// Handshake timeout, if set.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    /// Discovery timeout, if set.
    pub fn discovery_timeout(&self) -> Option<Duration> {
        self.discovery_timeout_ms.map(Duration::from_millis)
    }

    /// Subprocess call timeout, if set.
    pub fn stream_call_timeout(&self) -> Option<Duration> {
        self.stream_call_timeout_ms.map(Duration::from_millis)
    }

    /// HTTP call timeout, if set.
    pub fn network_call_timeout(&self) -> Option<Duration> {
        self.network_call_timeout_ms.map(Duration::from_millis)
    }

    /// Health check timeout, if set.
    pub fn ping_timeout(&self) -> Option<Duration> {
        self.ping_timeout_ms.map(Duration::from_millis)
    }

    /// Headers as owned tuples.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|[k, v]| (k.clone(), v.clone()))
            .collect()
    }

    /// Environment as owned tuples.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env.iter().map(|[k, v]| (k.clone(), v.clone())).collect()
    }
}

fn override_with<T>(base: &mut Option<T>, over: Option<T>) {
    if over.is_some() {
        *base = over;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Servers
// ─────────────────────────────────────────────────────────────────────────────

fn default_enabled() -> bool {
    true
}

/// A named endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Unique name, used on the command line.
    pub name: String,
    /// Connect target: an `http(s)://` URL or a command line.
    pub address: String,
    /// Whether this server is enabled. Defaults to true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ServerEntry {
    /// Whether the address is a URL rather than a command line.
    pub fn is_network(&self) -> bool {
        self.address.trim_start().contains("://")
    }
}
