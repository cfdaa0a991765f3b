//! Google Gemini API provider.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{LlmSettings, ProviderKind};
use crate::error::AgentError;
use crate::types::tool::arguments_to_json_string;
use crate::types::{ChatReply, Message, Role, ToolCallRequest, ToolSchema};

use super::http::{send_checked, send_json, shared_client, sse_text_stream, vendor_error_message, FrameOutcome};
use super::sanitize::{normalize_schema_for_provider, sanitize_messages_for_provider};
use super::{required_model, ChatProvider, SamplingSettings, TextStream};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    model: String,
    api_key: String,
    base_url: String,
    sampling: SamplingSettings,
}

impl GeminiProvider {
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

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn build_request_body(&self, messages: &[Message], tools: &[ToolSchema]) -> serde_json::Value {
        let contents: Vec<serde_json::Value> =
            sanitize_messages_for_provider(messages, ProviderKind::Gemini)
                .iter()
                .map(|msg| {
                    let role = match msg.role {
                        Role::Assistant => "model",
                        _ => "user",
                    };
                    serde_json::json!({
                        "role": role,
                        "parts": [{"text": msg.text()}],
                    })
                })
                .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.sampling.temperature,
                "maxOutputTokens": self.sampling.max_tokens,
            },
        });

        if !tools.is_empty() {
            let fn_decls: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": normalize_schema_for_provider(&t.parameters, ProviderKind::Gemini),
                    })
                })
                .collect();
            if let Some(obj) = body.as_object_mut() {
                obj.insert(
                    "tools".into(),
                    serde_json::json!([{"functionDeclarations": fn_decls}]),
                );
            }
        }

        body
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ChatReply, AgentError> {
        let body = self.build_request_body(messages, tools);

        debug!(model = %self.model, tools = tools.len(), "Gemini generateContent");

        let value = send_json(
            shared_client()
                .post(self.endpoint("generateContent"))
                .query(&[("key", self.api_key.as_str())])
                .json(&body),
        )
        .await?;

        let data: GeminiResponse = match serde_json::from_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "unrecognised Gemini reply shape");
                return Ok(ChatReply::text(""));
            }
        };

        let Some(candidate) = data.candidates.into_iter().next() else {
            warn!("Gemini reply carried no candidates");
            return Ok(ChatReply::text(""));
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for part in candidate.content.parts {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(fc) = part.function_call {
                let args = fc.args.unwrap_or(serde_json::Value::Null);
                tool_calls.push(ToolCallRequest::new(
                    uuid::Uuid::new_v4().to_string(),
                    fc.name,
                    arguments_to_json_string(&args),
                ));
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
impl ChatProvider for GeminiProvider {
    fn provider_name(&self) -> &str {
        "gemini"
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
        let body = self.build_request_body(messages, tools);

        debug!(model = %self.model, "Gemini streamGenerateContent");

        let resp = send_checked(
            shared_client()
                .post(self.endpoint("streamGenerateContent"))
                .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
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
    let Ok(chunk) = serde_json::from_str::<GeminiResponse>(data) else {
        return FrameOutcome::Skip;
    };
    if let Some(error) = &chunk.error {
        return FrameOutcome::Error(vendor_error_message(error));
    }
    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .map(|candidate| {
            candidate
                .content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();
    FrameOutcome::Text(text)
}

// Internal Gemini response types

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

#[derive(Deserialize, Default)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: Option<serde_json::Value>,
}
