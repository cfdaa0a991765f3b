//! OpenAI Chat Completions API provider.
//!
//! Also serves the `custom` provider: any endpoint speaking the same
//! chat-completions dialect under a configured base URL.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{LlmSettings, ProviderKind};
use crate::error::AgentError;
use crate::types::tool::arguments_to_json_string;
use crate::types::{ChatReply, Message, ToolCallRequest, ToolSchema};

use super::http::{
    bearer_headers, send_checked, send_json, shared_client, sse_text_stream, vendor_error_message, FrameOutcome,
};
use super::sanitize::sanitize_messages_for_provider;
use super::{required_model, ChatProvider, SamplingSettings, TextStream};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    kind: ProviderKind,
    model: String,
    api_key: String,
    base_url: String,
    sampling: SamplingSettings,
}

impl OpenAiProvider {
    pub fn new(settings: &LlmSettings) -> Result<Self, AgentError> {
        Ok(Self {
            kind: settings.provider,
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
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        stream: bool,
    ) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = sanitize_messages_for_provider(messages, self.kind)
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.text() }))
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.sampling.temperature,
            "max_tokens": self.sampling.max_tokens,
        });

        if let Some(obj) = body.as_object_mut() {
            if stream {
                obj.insert("stream".into(), true.into());
            }
            if !tools.is_empty() {
                let tool_defs: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect();
                obj.insert("tools".into(), tool_defs.into());
                obj.insert("tool_choice".into(), "auto".into());
            }
        }

        body
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<Option<OpenAiMessage>, AgentError> {
        let body = self.build_request_body(messages, tools, false);

        debug!(provider = %self.kind, model = %self.model, tools = tools.len(), "chat completion");

        let value = send_json(
            shared_client()
                .post(self.endpoint())
                .headers(bearer_headers(&self.api_key))
                .json(&body),
        )
        .await?;

        let data: OpenAiChatResponse = match serde_json::from_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "unrecognised chat completion shape");
                return Ok(None);
            }
        };
        Ok(data.choices.into_iter().next().map(|choice| choice.message))
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        self.kind.as_ref()
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<String, AgentError> {
        let message = self.complete(messages, tools).await?;
        Ok(message.and_then(|m| m.content).unwrap_or_default())
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<TextStream, AgentError> {
        let body = self.build_request_body(messages, tools, true);

        debug!(provider = %self.kind, model = %self.model, "chat completion stream");

        let resp = send_checked(
            shared_client()
                .post(self.endpoint())
                .headers(bearer_headers(&self.api_key))
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
        let Some(message) = self.complete(messages, tools).await? else {
            return Ok(ChatReply::text(""));
        };

        let tool_calls: Vec<ToolCallRequest> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                ToolCallRequest::new(
                    tc.id,
                    tc.function.name,
                    arguments_to_json_string(&tc.function.arguments),
                )
            })
            .collect();

        if tool_calls.is_empty() {
            return Ok(ChatReply::text(message.content.unwrap_or_default()));
        }
        let text = message.content.filter(|t| !t.trim().is_empty());
        Ok(ChatReply::tool_calls(text, tool_calls))
    }
}

fn parse_stream_frame(data: &str) -> FrameOutcome {
    match serde_json::from_str::<OpenAiStreamChunk>(data) {
        Ok(OpenAiStreamChunk { error: Some(error), .. }) => FrameOutcome::Error(vendor_error_message(&error)),
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .map(FrameOutcome::Text)
            .unwrap_or(FrameOutcome::Skip),
        Err(_) => FrameOutcome::Skip,
    }
}

// OpenAI API response types (internal)

#[derive(Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    #[serde(default)]
    id: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    /// Sent by the API and most compatible servers when generation fails mid-stream.
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
}
