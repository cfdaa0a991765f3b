//! Convenience re-exports for common use.

pub use crate::agent::{Agent, AgentState, ERROR_MARKER};
pub use crate::config::{AppConfig, LlmSettings, ProviderKind, ServerConfig};
pub use crate::error::{AgentError, Result};
pub use crate::mcp::{ToolServerClient, ToolServerRegistry};
pub use crate::provider::{create_provider, ChatProvider, TextStream};
pub use crate::types::{ChatReply, Message, Role, ToolCallRequest, ToolSchema};
