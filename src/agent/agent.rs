//! Conversation state machine driving provider and tool-server calls.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AgentError;
use crate::mcp::ToolServerRegistry;
use crate::provider::{self, ChatProvider};
use crate::types::{ChatReply, Message, ToolCallRequest};

use super::prompt::build_system_prompt;

/// Prefix that marks a reply as a failure rather than assistant text.
pub const ERROR_MARKER: &str = "❌ Error: ";

const NOT_INITIALIZED: &str = "Agent not initialized. Please check your configuration.";

/// Agent lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Uninitialized,
    Initializing,
    Ready,
    ConfigError,
}

/// A conversational agent over one LLM backend and a set of tool servers.
///
/// One turn at a time: `chat` and `chat_stream` take `&mut self`, so callers
/// serialize turns by construction.
pub struct Agent {
    config: AppConfig,
    registry: Arc<ToolServerRegistry>,
    injected_provider: Option<Arc<dyn ChatProvider>>,
    provider: Option<Arc<dyn ChatProvider>>,
    history: Vec<Message>,
    state: AgentState,
    error_message: Option<String>,
}

impl Agent {
    pub fn new(config: AppConfig, registry: Arc<ToolServerRegistry>) -> Self {
        Self {
            config,
            registry,
            injected_provider: None,
            provider: None,
            history: Vec::new(),
            state: AgentState::Uninitialized,
            error_message: None,
        }
    }

    /// Use this backend instead of building one from the config.
    ///
    /// The configured credential is still checked by [`initialize`](Self::initialize).
    pub fn with_provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.injected_provider = Some(provider);
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == AgentState::Ready
    }

    /// Diagnostic from the last failed [`initialize`](Self::initialize).
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolServerRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Owned copy of the conversation so far.
    pub fn get_history(&self) -> Vec<Message> {
        self.history.clone()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Validate the LLM settings, build the provider, and connect every
    /// enabled tool server. Individual server failures do not fail this.
    ///
    /// An unconfigured credential moves the agent to `ConfigError` without
    /// any network traffic.
    pub async fn initialize(&mut self) -> bool {
        if self.state == AgentState::Ready {
            return true;
        }
        self.state = AgentState::Initializing;
        self.error_message = None;

        let provider = match self.build_provider() {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, "agent configuration rejected");
                self.error_message = Some(e.to_string());
                self.state = AgentState::ConfigError;
                return false;
            }
        };

        let servers: Vec<_> = self.config.enabled_servers().cloned().collect();
        if !servers.is_empty() {
            let outcomes = self.registry.add_servers(servers).await;
            let connected = outcomes.iter().filter(|o| o.is_connected()).count();
            info!(connected, total = outcomes.len(), "tool servers initialized");
        }

        info!(
            provider = provider.provider_name(),
            model = provider.model_id(),
            "agent ready"
        );
        self.provider = Some(provider);
        self.state = AgentState::Ready;
        true
    }

    fn build_provider(&self) -> Result<Arc<dyn ChatProvider>, AgentError> {
        self.config.llm.validate()?;
        match &self.injected_provider {
            Some(provider) => Ok(provider.clone()),
            None => provider::create_provider(&self.config.llm),
        }
    }

    /// Run one blocking turn and return the reply text.
    ///
    /// Failures come back as text starting with [`ERROR_MARKER`]; the user
    /// message stays in history.
    pub async fn chat(&mut self, user_text: &str) -> String {
        let Some(provider) = self.ready_provider() else {
            return not_ready_reply();
        };

        self.history.push(Message::user(user_text));

        match self.run_turn(provider.as_ref()).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "chat turn failed");
                format!("{ERROR_MARKER}{e}")
            }
        }
    }

    async fn run_turn(&mut self, provider: &dyn ChatProvider) -> Result<String, AgentError> {
        let tools = self.registry.all_tools().await;
        let messages = self.request_messages().await;

        if tools.is_empty() {
            let reply = provider.chat(&messages, &[]).await?;
            self.history.push(Message::assistant(reply.clone()));
            return Ok(reply);
        }

        let reply = provider.chat_with_tools(&messages, &tools).await?;
        if !reply.has_tool_calls() {
            let text = reply.text.unwrap_or_default();
            self.history.push(Message::assistant(text.clone()));
            return Ok(text);
        }

        self.push_tool_placeholder(&reply);
        for call in &reply.tool_calls {
            self.execute_tool_call(call).await;
        }

        let messages = self.request_messages().await;
        let final_reply = provider.chat(&messages, &[]).await?;
        self.history.push(Message::assistant(final_reply.clone()));
        Ok(final_reply)
    }

    /// Run one turn, yielding reply fragments as they arrive.
    ///
    /// Tool detection is a blocking round-trip; while tools run the stream
    /// yields `🔧 Calling tool: <name>...` progress lines that are not part of
    /// the reply. The assistant entry is appended only once the stream is
    /// exhausted, so dropping it early leaves no partial reply in history.
    pub fn chat_stream<'a>(&'a mut self, user_text: &'a str) -> BoxStream<'a, String> {
        let stream = async_stream::stream! {
            let Some(provider) = self.ready_provider() else {
                yield not_ready_reply();
                return;
            };

            self.history.push(Message::user(user_text));

            let tools = self.registry.all_tools().await;
            let mut messages = self.request_messages().await;

            if !tools.is_empty() {
                let reply = match provider.chat_with_tools(&messages, &tools).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!(error = %e, "tool detection failed");
                        yield format!("{ERROR_MARKER}{e}");
                        return;
                    }
                };

                if !reply.has_tool_calls() {
                    let text = reply.text.unwrap_or_default();
                    self.history.push(Message::assistant(text.clone()));
                    yield text;
                    return;
                }

                self.push_tool_placeholder(&reply);
                for call in &reply.tool_calls {
                    yield format!("🔧 Calling tool: {}...\n\n", call.tool_name);
                    self.execute_tool_call(call).await;
                }
                messages = self.request_messages().await;
            }

            let mut upstream = match provider.chat_stream(&messages, &[]).await {
                Ok(upstream) => upstream,
                Err(e) => {
                    error!(error = %e, "stream open failed");
                    yield format!("{ERROR_MARKER}{e}");
                    return;
                }
            };

            let mut full_reply = String::new();
            while let Some(fragment) = upstream.next().await {
                match fragment {
                    Ok(fragment) => {
                        full_reply.push_str(&fragment);
                        yield fragment;
                    }
                    Err(e) => {
                        error!(error = %e, "stream interrupted");
                        yield format!("{ERROR_MARKER}{e}");
                        return;
                    }
                }
            }

            self.history.push(Message::assistant(full_reply));
        };

        Box::pin(stream)
    }

    /// Disconnect all tool servers and return to `Uninitialized`.
    pub async fn shutdown(&mut self) {
        self.registry.disconnect_all().await;
        self.provider = None;
        self.state = AgentState::Uninitialized;
        info!("agent shut down");
    }

    fn ready_provider(&self) -> Option<Arc<dyn ChatProvider>> {
        match (&self.state, &self.provider) {
            (AgentState::Ready, Some(provider)) => Some(provider.clone()),
            _ => None,
        }
    }

    async fn request_messages(&self) -> Vec<Message> {
        let servers = self.registry.connected_server_names().await;
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(Message::system(build_system_prompt(&servers)));
        messages.extend(self.history.iter().cloned());
        messages
    }

    fn push_tool_placeholder(&mut self, reply: &ChatReply) {
        let placeholder = match reply.text.as_deref() {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => format!(
                "Using tool: {}",
                reply
                    .tool_calls
                    .first()
                    .map(|c| c.tool_name.as_str())
                    .unwrap_or_default()
            ),
        };
        self.history.push(Message::assistant(placeholder));
    }

    async fn execute_tool_call(&mut self, call: &ToolCallRequest) {
        debug!(tool = %call.tool_name, id = %call.id, "executing tool call");
        let result = self
            .registry
            .call_tool(&call.tool_name, call.arguments())
            .await;
        self.history.push(Message::tool(format!(
            "Tool '{}' result: {}",
            call.tool_name, result
        )));
    }
}

fn not_ready_reply() -> String {
    format!("{ERROR_MARKER}{NOT_INITIALIZED}")
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("state", &self.state)
            .field("provider", &self.provider.as_ref().map(|p| p.provider_name()))
            .field("history", &self.history.len())
            .finish()
    }
}
