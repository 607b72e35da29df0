//! Command-line front for the agent stream bridge.
//!
//! `transcode` replays a captured SSE body offline, `chat` runs one live turn
//! against the configured agent server, `resume-signal` prints the message a
//! client sends to answer a pending interrupt.

use std::path::PathBuf;
use std::sync::Arc;

use agent_stream::TurnAccumulator;
use agent_stream::prelude::*;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::StreamExt as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "agent-stream",
    about = "Transcode agent-server SSE into the chat data-stream protocol"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transcode a captured SSE body (file or stdin) to stdout.
    Transcode {
        /// SSE capture; reads stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Re-chunk the input into pieces of this many bytes
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,
    },
    /// Run one turn against the agent server configured via AGENT_* variables.
    Chat {
        /// Conversation the turn belongs to
        #[arg(short, long, default_value = "cli")]
        conversation: String,
        /// Answer a pending interrupt (approved, denied, skipped)
        #[arg(long, requires = "thread_id")]
        resume: Option<ResumeAction>,
        /// Thread id of the interrupt being answered
        #[arg(long, requires = "resume")]
        thread_id: Option<String>,
        /// User message; may be omitted when resuming
        message: Option<String>,
    },
    /// Print the resume message for an interrupt decision.
    ResumeSignal {
        action: ResumeAction,
        thread_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    agent_stream::init_observability();

    match Cli::parse().command {
        Command::Transcode { input, chunk_size } => run_transcode(input, chunk_size).await,
        Command::Chat {
            conversation,
            resume,
            thread_id,
            message,
        } => {
            let resume = match (resume, thread_id) {
                (Some(action), Some(thread_id)) => Some(ResumeSignal::new(action, thread_id)),
                _ => None,
            };
            run_chat(&conversation, message, resume).await
        }
        Command::ResumeSignal { action, thread_id } => {
            println!("{}", ResumeSignal::new(action, thread_id));
            Ok(())
        }
    }
}

async fn run_transcode(
    input: Option<PathBuf>,
    chunk_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if chunk_size == 0 {
        return Err("--chunk-size must be at least 1".into());
    }
    let raw = match &input {
        Some(path) => tokio::fs::read(path).await?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            buf
        }
    };
    info!(bytes = raw.len(), chunk_size, "transcoding captured body");

    let chunks: Vec<Result<Bytes, std::io::Error>> = raw
        .chunks(chunk_size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let mut out = Box::pin(transcode(
        futures::stream::iter(chunks),
        TranscodeOptions::default().on_interrupt(|interrupt| {
            info!(tool_call_id = %interrupt.tool_call_id, thread_id = %interrupt.thread_id, "turn paused for approval");
            match serde_json::to_string(interrupt) {
                Ok(json) => eprintln!("pending interrupt: {json}"),
                Err(err) => eprintln!("pending interrupt (unprintable): {err}"),
            }
        }),
    ));
    let mut accumulator = TurnAccumulator::new();
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = out.next().await {
        accumulator.push_bytes(&chunk);
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;

    let persisted = accumulator.finish();
    eprintln!("persisted turn: {}", serde_json::to_string(&persisted)?);
    Ok(())
}

async fn run_chat(
    conversation: &str,
    message: Option<String>,
    resume: Option<ResumeSignal>,
) -> Result<(), Box<dyn std::error::Error>> {
    let sink = Arc::new(MemoryTurnSink::new());
    let service = ChatService::new(
        Arc::new(HttpAgentClient::from_env()?),
        InMemoryInterruptStore::shared(),
        sink.clone(),
    );

    let messages = message.map(ChatMessage::user).into_iter().collect();
    let turn = service.start_turn(conversation, messages, resume).await?;

    let mut stream = turn.stream;
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(&chunk).await?;
        stdout.flush().await?;
    }
    turn.mirror.await?;

    if let Some(pending) = service.pending_interrupt(conversation) {
        eprintln!("pending interrupt: {}", serde_json::to_string(&pending)?);
        eprintln!(
            "answer with: --resume <approved|denied|skipped> --thread-id {}",
            pending.thread_id
        );
    }
    for persisted in sink.turns(conversation) {
        eprintln!("persisted turn: {}", serde_json::to_string(&persisted)?);
    }
    Ok(())
}
