//! Agent: multi-turn conversations with tool execution.

pub mod agent;
pub mod prompt;

pub use agent::{Agent, AgentState, ERROR_MARKER};
pub use prompt::build_system_prompt;
