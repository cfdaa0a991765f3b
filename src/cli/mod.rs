//! Command-line front end: argument parsing and config resolution.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::config::{AppConfig, ProviderKind};
use crate::error::AgentError;

/// Chat with an LLM that can call tools from stdio tool servers.
#[derive(Parser, Debug)]
#[command(name = "toolbridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive chat session
    Chat(ChatArgs),
    /// Connect the configured tool servers and list their tools
    Tools(ConfigArgs),
}

/// Config file selection shared by all subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the `chat` subcommand.
#[derive(Args, Debug)]
pub struct ChatArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// Override the provider (openai, anthropic, gemini, custom)
    #[arg(short, long)]
    pub provider: Option<ProviderKind>,

    /// Override the model id
    #[arg(short, long)]
    pub model: Option<String>,
}

/// A line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplInput {
    Message(String),
    Clear,
    History,
    Tools,
    Exit,
    Empty,
    Unknown(String),
}

impl ReplInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        if !line.starts_with('/') {
            return Self::Message(line.to_string());
        }
        match line {
            "/clear" => Self::Clear,
            "/history" => Self::History,
            "/tools" => Self::Tools,
            "/exit" | "/quit" => Self::Exit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Resolve the config: explicit path, else the default path if it exists,
/// else defaults. Environment overrides are applied on top.
pub fn resolve_config(args: &ConfigArgs) -> Result<AppConfig, AgentError> {
    let _ = dotenvy::dotenv();
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => match AppConfig::default_path().filter(|p| p.exists()) {
            Some(path) => load_logged(&path)?,
            None => AppConfig::default(),
        },
    };
    config.apply_env_overrides();
    Ok(config)
}

fn load_logged(path: &Path) -> Result<AppConfig, AgentError> {
    tracing::debug!(path = %path.display(), "loading config");
    AppConfig::load(path)
}

/// Apply `--provider` / `--model` on top of a resolved config.
pub fn apply_chat_overrides(config: &mut AppConfig, args: &ChatArgs) {
    if let Some(provider) = args.provider {
        if provider != config.llm.provider {
            config.llm.model.clear();
        }
        config.llm.provider = provider;
    }
    if let Some(model) = &args.model {
        config.llm.model = model.clone();
    }
}
