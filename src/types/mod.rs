//! Core types shared by providers, tool servers and the agent.

pub mod message;
pub mod tool;

pub use message::*;
pub use tool::*;
