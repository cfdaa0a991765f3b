//! toolbridge CLI binary entry point.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use toolbridge::agent::Agent;
use toolbridge::cli::{apply_chat_overrides, resolve_config, ChatArgs, Cli, Commands, ConfigArgs, ReplInput};
use toolbridge::mcp::ToolServerRegistry;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Chat(args) => handle_chat(args).await,
        Commands::Tools(args) => handle_tools(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_chat(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = resolve_config(&args.config)?;
    apply_chat_overrides(&mut config, &args);

    let registry = Arc::new(ToolServerRegistry::new());
    let mut agent = Agent::new(config, registry.clone());
    if !agent.initialize().await {
        let message = agent.error_message().unwrap_or("initialization failed").to_string();
        return Err(message.into());
    }

    let servers = registry.connected_server_names().await;
    println!("toolbridge ready. Tool servers: {}", display_list(&servers));
    println!("Commands: /clear /history /tools /exit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match ReplInput::parse(&line) {
            ReplInput::Empty => continue,
            ReplInput::Exit => break,
            ReplInput::Clear => {
                agent.clear_history();
                println!("History cleared.");
            }
            ReplInput::History => {
                for message in agent.history() {
                    println!("[{}] {}", message.role.as_str(), message.text());
                }
            }
            ReplInput::Tools => {
                for tool in registry.all_tools().await {
                    println!("{}  {}", tool.name, tool.description);
                }
            }
            ReplInput::Unknown(command) => println!("Unknown command: {command}"),
            ReplInput::Message(text) if args.no_stream => {
                println!("{}\n", agent.chat(&text).await);
            }
            ReplInput::Message(text) => {
                let mut stream = agent.chat_stream(&text);
                while let Some(fragment) = stream.next().await {
                    print!("{fragment}");
                    std::io::stdout().flush()?;
                }
                println!("\n");
            }
        }
    }

    agent.shutdown().await;
    Ok(())
}

async fn handle_tools(args: ConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args)?;
    let registry = ToolServerRegistry::new();

    for outcome in registry.add_servers(config.enabled_servers().cloned()).await {
        match outcome.result {
            Ok(()) => println!("✓ {}", outcome.name),
            Err(e) => println!("✗ {}: {e}", outcome.name),
        }
    }

    for tool in registry.all_tools().await {
        println!("  {}  {}", tool.name, tool.description);
    }

    registry.disconnect_all().await;
    Ok(())
}

fn display_list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}
