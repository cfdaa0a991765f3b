//! Anthropic Messages API provider.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{LlmSettings, ProviderKind};
use crate::error::AgentError;
use crate::types::tool::arguments_to_json_string;
use crate::types::{ChatReply, Message, Role, ToolCallRequest, ToolSchema};

use super::http::{
    anthropic_headers, send_checked, send_json, shared_client, sse_text_stream, vendor_error_message, FrameOutcome,
};
use super::sanitize::sanitize_messages_for_provider;
use super::{required_model, ChatProvider, SamplingSettings, TextStream};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    model: String,
    api_key: String,
    base_url: String,
    sampling: SamplingSettings,
}

impl AnthropicProvider {
    pub fn new(settings: &LlmSettings) -> Result<Self, AgentError> {
        Ok(Self {
            model: required_model(settings)?,
            api_key: settings.api_key.clone(),
            base_url: settings
                .base_url()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            sampling: SamplingSettings::from(settings),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        stream: bool,
    ) -> serde_json::Value {
        let mut system_parts = Vec::new();
        let mut turns = Vec::new();

        for msg in sanitize_messages_for_provider(messages, ProviderKind::Anthropic) {
            match msg.role {
                Role::System => system_parts.push(msg.text().to_string()),
                Role::Assistant => turns.push(serde_json::json!({
                    "role": "assistant",
                    "content": msg.text(),
                })),
                Role::User | Role::Tool => turns.push(serde_json::json!({
                    "role": "user",
                    "content": msg.text(),
                })),
            }
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": turns,
            "max_tokens": self.sampling.max_tokens,
            "temperature": self.sampling.temperature,
        });

        if let Some(obj) = body.as_object_mut() {
            if !system_parts.is_empty() {
                obj.insert("system".into(), system_parts.join("\n\n").into());
            }
            if stream {
                obj.insert("stream".into(), true.into());
            }
            if !tools.is_empty() {
                let tool_defs: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect();
                obj.insert("tools".into(), tool_defs.into());
            }
        }

        body
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ChatReply, AgentError> {
        let body = self.build_request_body(messages, tools, false);

        debug!(model = %self.model, tools = tools.len(), "Anthropic messages");

        let value = send_json(
            shared_client()
                .post(self.endpoint())
                .headers(anthropic_headers(&self.api_key, API_VERSION))
                .json(&body),
        )
        .await?;

        let data: AnthropicResponse = match serde_json::from_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "unrecognised Anthropic reply shape");
                return Ok(ChatReply::text(""));
            }
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in data.content {
            match block.r#type.as_str() {
                "text" => {
                    if let Some(t) = block.text {
                        text.push_str(&t);
                    }
                }
                "tool_use" => {
                    if let Some(name) = block.name {
                        let input = block.input.unwrap_or(serde_json::Value::Null);
                        tool_calls.push(ToolCallRequest::new(
                            block.id.unwrap_or_default(),
                            name,
                            arguments_to_json_string(&input),
                        ));
                    }
                }
                _ => {}
            }
        }

        if tool_calls.is_empty() {
            return Ok(ChatReply::text(text));
        }
        let text = Some(text).filter(|t| !t.trim().is_empty());
        Ok(ChatReply::tool_calls(text, tool_calls))
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<String, AgentError> {
        let reply = self.complete(messages, tools).await?;
        Ok(reply.text.unwrap_or_default())
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<TextStream, AgentError> {
        let body = self.build_request_body(messages, tools, true);

        debug!(model = %self.model, "Anthropic messages stream");

        let resp = send_checked(
            shared_client()
                .post(self.endpoint())
                .headers(anthropic_headers(&self.api_key, API_VERSION))
                .json(&body),
        )
        .await?;

        Ok(sse_text_stream(resp, parse_stream_frame))
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ChatReply, AgentError> {
        self.complete(messages, tools).await
    }
}

fn parse_stream_frame(data: &str) -> FrameOutcome {
    let Ok(event) = serde_json::from_str::<AnthropicStreamEvent>(data) else {
        return FrameOutcome::Skip;
    };
    match event.r#type.as_str() {
        "content_block_delta" => event
            .delta
            .and_then(|delta| delta.text)
            .map(FrameOutcome::Text)
            .unwrap_or(FrameOutcome::Skip),
        "message_stop" => FrameOutcome::Stop,
        "error" => FrameOutcome::Error(
            event
                .error
                .as_ref()
                .map(vendor_error_message)
                .unwrap_or_else(|| "stream error".to_string()),
        ),
        _ => FrameOutcome::Skip,
    }
}

// Anthropic API response types (internal)

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct AnthropicStreamEvent {
    r#type: String,
    #[serde(default)]
    delta: Option<AnthropicStreamDelta>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct AnthropicStreamDelta {
    /// Present on `text_delta`; `input_json_delta` carries `partial_json` instead.
    #[serde(default)]
    text: Option<String>,
}
