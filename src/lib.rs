//! toolbridge: a conversational agent over pluggable LLM backends, extended
//! with tools served by stdio tool-server processes.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use toolbridge::prelude::*;
//!
//! # async fn example() {
//! let config = AppConfig::from_env();
//! let registry = Arc::new(ToolServerRegistry::new());
//! let mut agent = Agent::new(config, registry);
//! if agent.initialize().await {
//!     println!("{}", agent.chat("Hello!").await);
//! }
//! agent.shutdown().await;
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod mcp;
pub mod prelude;
pub mod provider;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
