//! Nydus CLI entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::info;

use nydus::domain::error::{ChatError, SwarmError};
use nydus::domain::ports::agent::AgentRuntime;
use nydus::domain::ports::bus::{InboundMessage, MessageBus, OutboundMessage};
use nydus::domain::ports::chat::{ChatMessage, ChatOptions, ChatProvider, ChatResponse};
use nydus::infrastructure::config::ConfigLoader;
use nydus::infrastructure::logging;
use nydus::{EmbeddedTransport, NodeDeps, SwarmNode};

#[derive(Parser)]
#[command(name = "nydus", version, about = "Distributed swarm coordination node")]
struct Cli {
    /// Path to a config file (defaults to the .nydus/ hierarchy).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a swarm node until interrupted.
    Start,
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective merged configuration.
    Show,
    /// Validate the configuration and exit.
    Validate,
}

/// Stand-in agent for standalone runs: acknowledges prompts verbatim.
/// Real deployments inject their agent runtime through the library API.
struct LoopbackAgent;

#[async_trait]
impl AgentRuntime for LoopbackAgent {
    async fn process_direct(&self, prompt: &str, session_key: &str) -> Result<String, SwarmError> {
        Ok(format!("[{session_key}] {prompt}"))
    }

    async fn process_inbound(&self, message: &InboundMessage) -> Result<String, SwarmError> {
        Ok(message.content.clone())
    }

    async fn set_identity(&self, _hid: &str, _sid: &str) {}
}

/// No LLM configured: decomposition degrades to direct execution.
struct NoProvider;

#[async_trait]
impl ChatProvider for NoProvider {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _model: &str,
        _opts: &ChatOptions,
    ) -> Result<ChatResponse, ChatError> {
        Err(ChatError::InvalidResponse("no chat provider configured".to_string()))
    }

    fn default_model(&self) -> String {
        String::new()
    }
}

/// Line-oriented stdin/stdout bus for interactive runs.
struct StdioBus {
    reader: tokio::sync::Mutex<tokio::io::BufReader<tokio::io::Stdin>>,
}

impl StdioBus {
    fn new() -> Self {
        Self {
            reader: tokio::sync::Mutex::new(tokio::io::BufReader::new(tokio::io::stdin())),
        }
    }
}

#[async_trait]
impl MessageBus for StdioBus {
    async fn next_inbound(&self) -> Option<InboundMessage> {
        use tokio::io::AsyncBufReadExt;
        let mut line = String::new();
        match self.reader.lock().await.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(InboundMessage {
                channel: "stdio".to_string(),
                chat_id: "local".to_string(),
                content: line.trim_end().to_string(),
            }),
        }
    }

    async fn publish_outbound(&self, message: OutboundMessage) -> Result<(), SwarmError> {
        println!("{}", message.content);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    match cli.command {
        Command::Config { command } => match command {
            ConfigCommand::Show => {
                println!("{}", serde_yaml::to_string(&config)?);
            }
            ConfigCommand::Validate => {
                ConfigLoader::validate(&config)?;
                println!("configuration ok");
            }
        },
        Command::Start => {
            let _log_handle = logging::init(&config.logging)?;

            let deps = NodeDeps {
                transport: Arc::new(EmbeddedTransport::new()),
                agent: Arc::new(LoopbackAgent),
                chat: Arc::new(NoProvider),
                bus: Arc::new(StdioBus::new()),
                workflow_runner: None,
                authorizer: None,
            };
            let node = SwarmNode::build(&config, deps).await?;
            node.start().await?;
            info!(identity = %node.identity(), "node running; ctrl-c to stop");

            tokio::signal::ctrl_c().await?;
            node.drain().await;
            node.stop().await;
        }
    }
    Ok(())
}
