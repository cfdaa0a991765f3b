//! Multi-server registry with composite-name routing.

use std::sync::Arc;

use futures::future::join_all;
use rmcp::model::JsonObject;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::AgentError;
use crate::types::ToolSchema;

use super::client::ToolServerClient;
use super::session::{StdioLauncher, ToolServerLauncher};

/// Separator between server name and local tool name.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// Build the routing key `<server>__<tool>`.
pub fn composite_tool_name(server: &str, tool: &str) -> String {
    format!("{server}{TOOL_NAME_SEPARATOR}{tool}")
}

/// Split a routing key at the first separator.
pub fn split_composite_name(name: &str) -> Option<(&str, &str)> {
    name.split_once(TOOL_NAME_SEPARATOR)
}

/// Result of registering one server via [`ToolServerRegistry::add_servers`].
#[derive(Debug)]
pub struct ServerOutcome {
    pub name: String,
    pub result: Result<(), AgentError>,
}

impl ServerOutcome {
    pub fn is_connected(&self) -> bool {
        self.result.is_ok()
    }
}

/// Owns every connected tool server, in registration order.
///
/// Reads (`all_tools`, `call_tool`) share a read lock and may run together.
/// Connects happen before the write lock is taken.
pub struct ToolServerRegistry {
    launcher: Arc<dyn ToolServerLauncher>,
    clients: RwLock<Vec<ToolServerClient>>,
}

impl Default for ToolServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolServerRegistry {
    /// Registry that spawns stdio servers.
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(StdioLauncher))
    }

    pub fn with_launcher(launcher: Arc<dyn ToolServerLauncher>) -> Self {
        Self {
            launcher,
            clients: RwLock::new(Vec::new()),
        }
    }

    /// Connect one server and register it under `config.name`.
    ///
    /// Returns `false` if the name is invalid or taken, or the connect fails.
    /// A failed server is not retained.
    pub async fn add_server(&self, config: ServerConfig) -> bool {
        let name = config.name.clone();
        match self.try_add_server(config).await {
            Ok(()) => true,
            Err(e) => {
                warn!(server = %name, error = %e, "tool server not registered");
                false
            }
        }
    }

    /// Like [`add_server`](Self::add_server) but reports why it failed.
    pub async fn try_add_server(&self, config: ServerConfig) -> Result<(), AgentError> {
        validate_server_name(&config.name)?;
        self.ensure_name_free(&config.name).await?;

        let mut client = ToolServerClient::new(config, self.launcher.clone());
        client.try_connect().await?;
        self.insert(client).await
    }

    /// Connect many servers concurrently.
    ///
    /// One server failing never affects another. Successful servers are
    /// registered in the order given, regardless of which connects first.
    pub async fn add_servers<I>(&self, configs: I) -> Vec<ServerOutcome>
    where
        I: IntoIterator<Item = ServerConfig>,
    {
        let configs: Vec<ServerConfig> = configs.into_iter().collect();
        let mut seen: Vec<&str> = Vec::with_capacity(configs.len());
        let mut attempts = Vec::with_capacity(configs.len());

        for config in &configs {
            let precheck = match validate_server_name(&config.name) {
                Err(e) => Err(e),
                Ok(()) if seen.contains(&config.name.as_str()) => Err(duplicate(&config.name)),
                Ok(()) => self.ensure_name_free(&config.name).await,
            };
            seen.push(config.name.as_str());
            attempts.push(precheck);
        }

        let launcher = self.launcher.clone();
        let connects = configs.iter().zip(attempts).map(|(config, precheck)| {
            let launcher = launcher.clone();
            let config = config.clone();
            async move {
                precheck?;
                let mut client = ToolServerClient::new(config, launcher);
                client.try_connect().await?;
                Ok::<_, AgentError>(client)
            }
        });
        let connected = join_all(connects).await;

        let mut outcomes = Vec::with_capacity(configs.len());
        for (config, result) in configs.iter().zip(connected) {
            let result = match result {
                Ok(client) => self.insert(client).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                warn!(server = %config.name, error = %e, "tool server not registered");
            }
            outcomes.push(ServerOutcome {
                name: config.name.clone(),
                result,
            });
        }
        outcomes
    }

    /// Disconnect and forget a server. Returns whether it was present.
    pub async fn remove_server(&self, name: &str) -> bool {
        let removed = {
            let mut clients = self.clients.write().await;
            clients
                .iter()
                .position(|c| c.name() == name)
                .map(|index| clients.remove(index))
        };
        match removed {
            Some(mut client) => {
                client.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Snapshot of every connected server's tools under composite names.
    pub async fn all_tools(&self) -> Vec<ToolSchema> {
        let clients = self.clients.read().await;
        clients
            .iter()
            .filter(|c| c.is_connected())
            .flat_map(|c| {
                c.tools().iter().map(move |tool| ToolSchema {
                    name: composite_tool_name(c.name(), &tool.name),
                    ..tool.clone()
                })
            })
            .collect()
    }

    /// Route a composite tool name to its server. Failures come back as text.
    pub async fn call_tool(&self, composite_name: &str, arguments: JsonObject) -> String {
        let clients = self.clients.read().await;
        match route(&clients, composite_name) {
            Ok((client, tool)) => {
                debug!(server = client.name(), tool, "routing tool call");
                client.call_tool(tool, arguments).await
            }
            Err(e) => format!("Error: {e}"),
        }
    }

    /// Names of connected servers, in registration order.
    pub async fn connected_server_names(&self) -> Vec<String> {
        self.clients
            .read()
            .await
            .iter()
            .filter(|c| c.is_connected())
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Disconnect every server and clear the registry.
    pub async fn disconnect_all(&self) {
        let drained: Vec<ToolServerClient> = self.clients.write().await.drain(..).collect();
        for mut client in drained {
            client.disconnect().await;
        }
    }

    async fn ensure_name_free(&self, name: &str) -> Result<(), AgentError> {
        if self.clients.read().await.iter().any(|c| c.name() == name) {
            return Err(duplicate(name));
        }
        Ok(())
    }

    async fn insert(&self, mut client: ToolServerClient) -> Result<(), AgentError> {
        let mut clients = self.clients.write().await;
        if clients.iter().any(|c| c.name() == client.name()) {
            drop(clients);
            let err = duplicate(client.name());
            client.disconnect().await;
            return Err(err);
        }
        info!(server = client.name(), "tool server registered");
        clients.push(client);
        Ok(())
    }
}

fn route<'a, 'n>(
    clients: &'a [ToolServerClient],
    composite_name: &'n str,
) -> Result<(&'a ToolServerClient, &'n str), AgentError> {
    let (server, tool) = split_composite_name(composite_name).ok_or_else(|| {
        AgentError::Routing(format!("Invalid tool name format: {composite_name}"))
    })?;
    let client = clients
        .iter()
        .find(|c| c.name() == server)
        .ok_or_else(|| AgentError::Routing(format!("MCP server '{server}' not found")))?;
    if !client.is_connected() {
        return Err(AgentError::Routing(format!(
            "MCP server '{server}' is not connected"
        )));
    }
    Ok((client, tool))
}

fn validate_server_name(name: &str) -> Result<(), AgentError> {
    if name.trim().is_empty() {
        return Err(AgentError::Configuration(
            "Tool server name must not be empty".into(),
        ));
    }
    if name.contains(TOOL_NAME_SEPARATOR) {
        return Err(AgentError::Configuration(format!(
            "Tool server name '{name}' must not contain '{TOOL_NAME_SEPARATOR}'"
        )));
    }
    Ok(())
}

fn duplicate(name: &str) -> AgentError {
    AgentError::Configuration(format!("Tool server '{name}' is already registered"))
}
