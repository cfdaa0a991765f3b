//! Stdio tool servers: sessions, per-server clients, and the routing registry.

pub mod client;
pub mod registry;
pub mod session;

/// Tool-call argument object.
pub use rmcp::model::JsonObject;

pub use client::{ConnectionState, ToolServerClient};
pub use registry::{
    composite_tool_name, split_composite_name, ServerOutcome, ToolServerRegistry,
    TOOL_NAME_SEPARATOR,
};
pub use session::{StdioLauncher, ToolCallOutput, ToolContent, ToolServerLauncher, ToolSession};
