//! LLM provider trait and vendor implementations.

pub mod http;
pub mod sanitize;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(feature = "google")]
pub mod google;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::{LlmSettings, ProviderKind};
use crate::error::AgentError;
use crate::types::{ChatReply, Message, ToolSchema};

/// Incremental text fragments from a streamed reply.
///
/// Dropping the stream closes the underlying HTTP connection.
pub type TextStream = BoxStream<'static, Result<String, AgentError>>;

/// Sampling parameters forwarded verbatim to the vendor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingSettings {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl From<&LlmSettings> for SamplingSettings {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }
}

/// Core trait implemented by every LLM backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name (e.g. "openai", "gemini").
    fn provider_name(&self) -> &str;

    /// The model ID requests are sent to.
    fn model_id(&self) -> &str;

    /// One blocking round-trip returning the reply text.
    async fn chat(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<String, AgentError>;

    /// Open a streamed reply yielding text deltas only.
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<TextStream, AgentError>;

    /// One blocking round-trip that may come back with tool calls.
    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ChatReply, AgentError>;
}

/// Create the provider selected by `settings.provider`.
pub fn create_provider(settings: &LlmSettings) -> Result<Arc<dyn ChatProvider>, AgentError> {
    settings.validate()?;

    match settings.provider {
        #[cfg(feature = "openai")]
        ProviderKind::OpenAi | ProviderKind::Custom => {
            Ok(Arc::new(openai::OpenAiProvider::new(settings)?))
        }
        #[cfg(feature = "anthropic")]
        ProviderKind::Anthropic => Ok(Arc::new(anthropic::AnthropicProvider::new(settings)?)),
        #[cfg(feature = "google")]
        ProviderKind::Gemini => Ok(Arc::new(google::GeminiProvider::new(settings)?)),
        #[allow(unreachable_patterns)]
        other => Err(AgentError::Configuration(format!(
            "Provider '{other}' not enabled via feature flags"
        ))),
    }
}

/// Resolve the model id, which `validate` has already guaranteed.
pub(crate) fn required_model(settings: &LlmSettings) -> Result<String, AgentError> {
    settings.resolved_model().ok_or_else(|| {
        AgentError::Configuration(format!(
            "No model configured for provider '{}'",
            settings.provider
        ))
    })
}
