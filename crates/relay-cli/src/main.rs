// ============================================================================
// chat-relay - memory-augmented chat relay over LocalAI and Qdrant
// ============================================================================
// Usage:
//   chat-relay serve                               Run HTTP + WebSocket server
//   chat-relay ask <ID> <MESSAGE> [--stream]       One exchange from the terminal
//   chat-relay recall <ID> <QUERY> [--limit N]     Print recalled turns as JSON
//   chat-relay init-collection                     Create the Qdrant collection
// ============================================================================

mod server;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_core::{
    ChatInput, CompletionClient, EmbeddingService, MemoryStore, Orchestrator, QdrantIndex,
    RelayConfig, ReplyEvent,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Chat relay with per-identity vector memory
#[derive(Parser)]
#[command(name = "chat-relay", version, about = "Chat relay with per-identity vector memory")]
struct Cli {
    /// Listen address (overrides RELAY_BIND)
    #[arg(long, global = true)]
    bind: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure the collection exists, then serve /chat, /ws and /health
    Serve,

    /// Run one orchestrated exchange and print the reply
    Ask {
        /// Anonymous identity that owns the memory
        identity: String,

        /// Message to send
        message: String,

        /// Print tokens as they arrive
        #[arg(long)]
        stream: bool,
    },

    /// Show which stored turns a query would recall
    Recall {
        identity: String,

        query: String,

        /// Maximum number of turns (default: HISTORY_LIMIT)
        #[arg(long)]
        limit: Option<u64>,

        /// Minimum similarity score (default: SCORE_THRESHOLD)
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Create the memory collection and its payload indexes if missing
    InitCollection,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_relay=info".parse()?)
                .add_directive("relay_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = RelayConfig::from_env().context("Invalid relay configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    match cli.command {
        Commands::Serve => cmd_serve(&config).await,
        Commands::Ask {
            identity,
            message,
            stream,
        } => cmd_ask(&config, identity, message, stream).await,
        Commands::Recall {
            identity,
            query,
            limit,
            threshold,
        } => cmd_recall(&config, &identity, &query, limit, threshold).await,
        Commands::InitCollection => cmd_init_collection(&config).await,
    }
}

fn build_memory(config: &RelayConfig, client: reqwest::Client) -> Result<Arc<MemoryStore>> {
    let index = QdrantIndex::connect(&config.qdrant_url, &config.collection)
        .with_context(|| format!("Failed to connect to Qdrant at {}", config.qdrant_url))?;
    let embeddings = EmbeddingService::new(client, config);
    Ok(Arc::new(MemoryStore::new(
        Arc::new(index),
        Arc::new(embeddings),
        config.vector_size,
    )))
}

fn build_orchestrator(config: &RelayConfig) -> Result<Arc<Orchestrator>> {
    let client = relay_core::http::build_client(config)?;
    let memory = build_memory(config, client.clone())?;
    let model = CompletionClient::new(client, config);

    info!(
        "Using chat model {} and embedding model {} at {}",
        config.chat_model, config.embedding_model, config.inference_base_url
    );

    Ok(Arc::new(Orchestrator::new(
        memory,
        Arc::new(model),
        config.system_prompt.clone(),
        config.recall_settings(),
    )))
}

async fn cmd_serve(config: &RelayConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;

    orchestrator
        .memory()
        .ensure_collection()
        .await
        .with_context(|| format!("Failed to prepare collection '{}'", config.collection))?;

    server::serve(&config.bind_addr, server::AppState::new(orchestrator)).await
}

async fn cmd_ask(
    config: &RelayConfig,
    identity: String,
    message: String,
    stream: bool,
) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    orchestrator.memory().ensure_collection().await?;

    let input = ChatInput::new(identity, message);

    if !stream {
        let reply = orchestrator.reply(input).await?;
        println!("{}", reply);
        return Ok(());
    }

    let (tx, mut rx) = mpsc::channel::<ReplyEvent>(64);
    let cancel = CancellationToken::new();

    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                ReplyEvent::Token(text) => {
                    let _ = write!(stdout, "{}", text);
                    let _ = stdout.flush();
                }
                ReplyEvent::Done => {
                    let _ = writeln!(stdout);
                }
            }
        }
    });

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning reply");
            interrupt.cancel();
        }
    });

    let result = orchestrator.stream_reply(input, tx, cancel).await;
    let _ = printer.await;
    result?;
    Ok(())
}

async fn cmd_recall(
    config: &RelayConfig,
    identity: &str,
    query: &str,
    limit: Option<u64>,
    threshold: Option<f32>,
) -> Result<()> {
    let client = relay_core::http::build_client(config)?;
    let memory = build_memory(config, client)?;
    let settings = config.recall_settings();

    let recalled = memory
        .search(
            identity,
            query,
            limit.unwrap_or(settings.limit),
            threshold.unwrap_or(settings.score_threshold),
        )
        .await?;

    println!("{}", serde_json::to_string_pretty(&recalled)?);
    Ok(())
}

async fn cmd_init_collection(config: &RelayConfig) -> Result<()> {
    let client = relay_core::http::build_client(config)?;
    let memory = build_memory(config, client)?;

    if memory.ensure_collection().await? {
        println!("Created collection '{}'", config.collection);
    } else {
        println!("Collection '{}' already exists", config.collection);
    }
    Ok(())
}
