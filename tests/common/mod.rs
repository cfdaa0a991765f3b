//! Shared test helpers: a scripted provider and scripted tool servers.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use toolbridge::config::{AppConfig, LlmSettings, ServerConfig};
use toolbridge::error::AgentError;
use toolbridge::mcp::{JsonObject, ToolCallOutput, ToolServerLauncher, ToolSession};
use toolbridge::provider::{ChatProvider, TextStream};
use toolbridge::types::{ChatReply, Message, ToolCallRequest, ToolSchema};

/// One scripted provider reply, consumed in order by any of the three calls.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
    /// Tool calls accompanied by advisory assistant text.
    ToolCallsWithText(String, Vec<ToolCallRequest>),
    Upstream(u16),
    /// Stream these fragments, then fail.
    BrokenStream(Vec<String>),
}

/// What the provider was asked.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub call: &'static str,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// A provider that replays queued steps and records every request.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedProvider {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.requests().iter().map(|r| r.call).collect()
    }

    fn next(&self, call: &'static str, messages: &[Message], tools: &[ToolSchema]) -> Step {
        self.requests.lock().unwrap().push(Recorded {
            call,
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Text("Mock response".into()))
    }
}

/// Split text into three-character fragments.
pub fn fragments(text: &str) -> Vec<String> {
    text.chars()
        .collect::<Vec<_>>()
        .chunks(3)
        .map(|c| c.iter().collect())
        .collect()
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<String, AgentError> {
        match self.next("chat", messages, tools) {
            Step::Text(text) => Ok(text),
            Step::ToolCalls(_) => Ok(String::new()),
            Step::ToolCallsWithText(text, _) => Ok(text),
            Step::Upstream(status) => Err(AgentError::upstream(status, "scripted failure")),
            Step::BrokenStream(parts) => Ok(parts.concat()),
        }
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<TextStream, AgentError> {
        let items: Vec<Result<String, AgentError>> = match self.next("chat_stream", messages, tools) {
            Step::Text(text) => fragments(&text).into_iter().map(Ok).collect(),
            Step::ToolCalls(_) => Vec::new(),
            Step::ToolCallsWithText(text, _) => vec![Ok(text)],
            Step::Upstream(status) => return Err(AgentError::upstream(status, "scripted failure")),
            Step::BrokenStream(parts) => parts
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(AgentError::Stream("connection reset".into()))))
                .collect(),
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ChatReply, AgentError> {
        match self.next("chat_with_tools", messages, tools) {
            Step::Text(text) => Ok(ChatReply::text(text)),
            Step::ToolCalls(calls) => Ok(ChatReply::tool_calls(None, calls)),
            Step::ToolCallsWithText(text, calls) => Ok(ChatReply::tool_calls(Some(text), calls)),
            Step::Upstream(status) => Err(AgentError::upstream(status, "scripted failure")),
            Step::BrokenStream(parts) => Ok(ChatReply::text(parts.concat())),
        }
    }
}

/// A tool invocation seen by a scripted server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub server: String,
    pub tool: String,
    pub arguments: JsonObject,
}

/// Launches in-process tool servers with fixed catalogs.
#[derive(Default)]
pub struct ScriptedLauncher {
    catalogs: HashMap<String, Vec<ToolSchema>>,
    failing: HashSet<String>,
    invocations: Arc<Mutex<Vec<ToolInvocation>>>,
    launches: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, name: &str, tools: &[&str]) -> Self {
        let catalog = tools
            .iter()
            .map(|tool| {
                ToolSchema::new(
                    *tool,
                    format!("{tool} on {name}"),
                    json!({"type": "object", "properties": {}}),
                )
            })
            .collect();
        self.catalogs.insert(name.to_string(), catalog);
        self
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn invocations(&self) -> Arc<Mutex<Vec<ToolInvocation>>> {
        self.invocations.clone()
    }

    pub fn launches(&self) -> Arc<Mutex<Vec<String>>> {
        self.launches.clone()
    }
}

#[async_trait]
impl ToolServerLauncher for ScriptedLauncher {
    async fn launch(&self, config: &ServerConfig) -> Result<Box<dyn ToolSession>, AgentError> {
        self.launches.lock().unwrap().push(config.name.clone());
        if self.failing.contains(&config.name) {
            return Err(AgentError::connection(&config.name, "failed to spawn"));
        }
        let tools = self
            .catalogs
            .get(&config.name)
            .cloned()
            .ok_or_else(|| AgentError::connection(&config.name, "unknown command"))?;
        Ok(Box::new(ScriptedSession {
            server: config.name.clone(),
            tools,
            invocations: self.invocations.clone(),
        }))
    }
}

struct ScriptedSession {
    server: String,
    tools: Vec<ToolSchema>,
    invocations: Arc<Mutex<Vec<ToolInvocation>>>,
}

#[async_trait]
impl ToolSession for ScriptedSession {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, AgentError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<ToolCallOutput, AgentError> {
        self.invocations.lock().unwrap().push(ToolInvocation {
            server: self.server.clone(),
            tool: name.to_string(),
            arguments: arguments.clone(),
        });
        Ok(ToolCallOutput::text(format!(
            "{}:{} {}",
            self.server,
            name,
            serde_json::Value::Object(arguments)
        )))
    }

    async fn close(&mut self) -> Result<(), AgentError> {
        Ok(())
    }
}

pub fn server(name: &str) -> ServerConfig {
    ServerConfig::new(name, format!("{name}-server"))
}

/// A config with a credential set, so the agent passes validation.
pub fn configured(servers: Vec<ServerConfig>) -> AppConfig {
    AppConfig {
        llm: LlmSettings {
            api_key: "sk-test".into(),
            ..Default::default()
        },
        servers,
    }
}
