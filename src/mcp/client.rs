//! Client for one stdio tool server.

use std::sync::Arc;

use rmcp::model::JsonObject;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::AgentError;
use crate::types::ToolSchema;

use super::session::{ToolServerLauncher, ToolSession};

/// Lifecycle of a [`ToolServerClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Owns one tool-server connection and its cached tool catalog.
pub struct ToolServerClient {
    config: ServerConfig,
    launcher: Arc<dyn ToolServerLauncher>,
    session: Option<Box<dyn ToolSession>>,
    tools: Vec<ToolSchema>,
    state: ConnectionState,
    last_error: Option<String>,
}

impl ToolServerClient {
    pub fn new(config: ServerConfig, launcher: Arc<dyn ToolServerLauncher>) -> Self {
        Self {
            config,
            launcher,
            session: None,
            tools: Vec::new(),
            state: ConnectionState::Disconnected,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Why the last connect attempt failed, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Last successfully fetched catalog; empty until connected.
    pub fn tools(&self) -> &[ToolSchema] {
        &self.tools
    }

    /// Spawn, handshake and fetch the catalog. Any failure leaves the client
    /// `Failed` and returns `false`.
    pub async fn connect(&mut self) -> bool {
        match self.try_connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!(server = %self.config.name, error = %e, "tool server connection failed");
                false
            }
        }
    }

    /// Like [`connect`](Self::connect) but reports the failure.
    pub async fn try_connect(&mut self) -> Result<(), AgentError> {
        self.close_session().await;
        self.state = ConnectionState::Connecting;
        self.last_error = None;

        let result = self.open_session().await;
        match result {
            Ok((session, tools)) => {
                info!(server = %self.config.name, tools = tools.len(), "connected to tool server");
                self.session = Some(session);
                self.tools = tools;
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> Result<(Box<dyn ToolSession>, Vec<ToolSchema>), AgentError> {
        let mut session = self.launcher.launch(&self.config).await?;
        match session.list_tools().await {
            Ok(tools) => Ok((session, tools)),
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    warn!(server = %self.config.name, error = %close_err, "closing failed session");
                }
                Err(AgentError::connection(
                    &self.config.name,
                    format!("tool catalog fetch failed: {e}"),
                ))
            }
        }
    }

    /// Invoke a tool by its local name. Failures come back as text.
    pub async fn call_tool(&self, name: &str, arguments: JsonObject) -> String {
        let Some(session) = self.session.as_ref().filter(|_| self.is_connected()) else {
            return "Error: Not connected to MCP server".to_string();
        };

        match session.call_tool(name, arguments).await {
            Ok(output) => output.render(),
            Err(e) => {
                warn!(server = %self.config.name, tool = name, error = %e, "tool call failed");
                format!("Error calling tool {name}: {e}")
            }
        }
    }

    /// Tear down the session. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if self.close_session().await {
            info!(server = %self.config.name, "disconnected from tool server");
        }
        self.tools.clear();
        self.state = ConnectionState::Disconnected;
    }

    async fn close_session(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        if let Err(e) = session.close().await {
            warn!(server = %self.config.name, error = %e, "error while closing tool server");
        }
        true
    }
}

impl std::fmt::Debug for ToolServerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServerClient")
            .field("name", &self.config.name)
            .field("state", &self.state)
            .field("tools", &self.tools.len())
            .finish()
    }
}
