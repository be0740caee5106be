//! Single entry point for driving connections by action name.
//!
//! Callers hand over an action name and an [`ActionInput`]; the result is a
//! short display string or a typed [`McpError`].

use std::str::FromStr;

use serde_json::{Map, Value};

use crate::dispatcher::Dispatcher;
use crate::error::{McpError, Result};
use crate::health::{HealthMonitor, HealthStatus};
use crate::manager::{ConnectionManager, DisconnectOutcome};

/// Arguments for an action, either already structured or free text.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionInput {
    /// A parameter map.
    Structured(Map<String, Value>),
    /// Raw text. Parsed as a JSON object when possible, otherwise used as
    /// the action's primary field.
    FreeText(String),
}

impl ActionInput {
    /// Combine the two argument sources. Non-empty structured arguments win
    /// over text content.
    pub fn from_parts(args: Option<Map<String, Value>>, content: Option<&str>) -> Self {
        match (args, content) {
            (Some(args), _) if !args.is_empty() => Self::Structured(args),
            (_, Some(text)) if !text.trim().is_empty() => Self::FreeText(text.to_string()),
            (args, _) => Self::Structured(args.unwrap_or_default()),
        }
    }

    fn into_params(self, primary: Option<&str>) -> Map<String, Value> {
        match self {
            Self::Structured(map) => map,
            Self::FreeText(text) => {
                let text = text.trim();
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
                    return map;
                }
                let mut map = Map::new();
                if let Some(field) = primary
                    && !text.is_empty()
                {
                    map.insert(field.to_string(), Value::String(text.to_string()));
                }
                map
            }
        }
    }
}

impl Default for ActionInput {
    fn default() -> Self {
        Self::Structured(Map::new())
    }
}

/// Actions the entry point understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect,
    Disconnect,
    ListTools,
    CallTool,
    ListServers,
    HealthCheck,
}

impl Action {
    /// Every action, in display order.
    pub const ALL: [Action; 6] = [
        Action::Connect,
        Action::Disconnect,
        Action::ListTools,
        Action::CallTool,
        Action::ListServers,
        Action::HealthCheck,
    ];

    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::ListTools => "list_tools",
            Self::CallTool => "call_tool",
            Self::ListServers => "list_servers",
            Self::HealthCheck => "health_check",
        }
    }

    /// The field free text is assigned to.
    fn primary_field(&self) -> Option<&'static str> {
        match self {
            Self::Connect => Some("address"),
            Self::Disconnect | Self::ListTools => Some("connection_id"),
            Self::CallTool => Some("tool_name"),
            Self::ListServers | Self::HealthCheck => None,
        }
    }
}

impl FromStr for Action {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| McpError::UnknownAction(s.to_string()))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tool-connection capability.
#[derive(Debug, Clone)]
pub struct McpCapability {
    manager: ConnectionManager,
    dispatcher: Dispatcher,
    health: HealthMonitor,
}

impl McpCapability {
    /// Build the capability over a manager.
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            dispatcher: Dispatcher::new(manager.clone()),
            health: HealthMonitor::new(manager.clone()),
            manager,
        }
    }

    /// The underlying manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Run an action.
    pub async fn execute(&self, action: &str, input: ActionInput) -> Result<String> {
        let action: Action = action.trim().parse()?;
        let params = input.into_params(action.primary_field());
        tracing::debug!(action = %action, "executing capability action");

        match action {
            Action::Connect => self.connect(&params).await,
            Action::Disconnect => self.disconnect(&params).await,
            Action::ListTools => self.list_tools(&params).await,
            Action::CallTool => self.call_tool(&params).await,
            Action::ListServers => Ok(self.list_servers()),
            Action::HealthCheck => Ok(self.health_check().await),
        }
    }

    async fn connect(&self, params: &Map<String, Value>) -> Result<String> {
        let address = required(params, "address")?;
        let name = optional(params, "name");
        let outcome = self.manager.connect(address, name).await?;
        let conn = self.manager.get(&outcome.id)?;

        if outcome.reused {
            return Ok(format!(
                "Already connected to {} ({})",
                conn.display_name, conn.id
            ));
        }
        Ok(format!(
            "Connected to {} ({}) via {}: {} tool(s) available",
            conn.display_name,
            conn.id,
            conn.transport,
            conn.tools.len()
        ))
    }

    async fn disconnect(&self, params: &Map<String, Value>) -> Result<String> {
        let id = required(params, "connection_id")?;
        Ok(match self.manager.disconnect(id).await? {
            DisconnectOutcome::Disconnected => format!("Disconnected {}", id),
            DisconnectOutcome::AlreadyDisconnected => format!("{} was already disconnected", id),
        })
    }

    /// `refresh: true` re-runs discovery first.
    async fn list_tools(&self, params: &Map<String, Value>) -> Result<String> {
        let id = required(params, "connection_id")?;
        if params.get("refresh").and_then(Value::as_bool).unwrap_or(false) {
            self.manager.refresh_tools(id).await?;
        }
        let tools = self.manager.tools(id)?;
        if tools.is_empty() {
            return Ok(format!("No tools available on {}", id));
        }

        let mut out = format!("{} tool(s) on {}:", tools.len(), id);
        for tool in tools {
            match tool.description {
                Some(desc) => out.push_str(&format!("\n- {}: {}", tool.name, desc)),
                None => out.push_str(&format!("\n- {}", tool.name)),
            }
        }
        Ok(out)
    }

    async fn call_tool(&self, params: &Map<String, Value>) -> Result<String> {
        let id = required(params, "connection_id")?;
        let tool = required(params, "tool_name")?;
        let not_an_object = || McpError::InvalidParameter {
            name: "arguments".to_string(),
            reason: "expected a JSON object".to_string(),
        };
        let args = match params.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                _ => return Err(not_an_object()),
            },
            Some(_) => return Err(not_an_object()),
        };

        let output = self.dispatcher.call_tool(id, tool, args).await?;
        if output.is_error {
            return Ok(format!("Tool '{}' reported an error: {}", tool, output.text));
        }
        Ok(output.text)
    }

    fn list_servers(&self) -> String {
        let connections = self.manager.list();
        if connections.is_empty() {
            return "No connections".to_string();
        }

        let mut lines = Vec::with_capacity(connections.len());
        for conn in connections {
            let mut line = format!(
                "{} [{}] {} via {}, {} tool(s)",
                conn.display_name,
                conn.id,
                conn.state,
                conn.transport,
                conn.tools.len()
            );
            if let Some(err) = conn.last_error {
                line.push_str(&format!(" (last error: {})", err));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    async fn health_check(&self) -> String {
        let reports = self.health.check().await;
        if reports.is_empty() {
            return "No connections".to_string();
        }

        reports
            .into_iter()
            .map(|r| match (r.status, r.latency, r.error) {
                (HealthStatus::Healthy, Some(latency), _) => {
                    format!("{} [{}]: healthy ({}ms)", r.name, r.id, latency.as_millis())
                }
                (status, _, Some(err)) => format!("{} [{}]: {} ({})", r.name, r.id, status, err),
                (status, _, None) => format!("{} [{}]: {}", r.name, r.id, status),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn required<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    optional(params, key).ok_or_else(|| McpError::MissingParameter(key.to_string()))
}

fn optional<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
