//! Streaming bridge between an OpenAI-compatible agent server and a chat
//! frontend speaking the multi-step data-stream protocol.
//!
//! The upstream emits SSE lines carrying chat completion chunks plus custom
//! `agent_progress`, `tool_result` and `tool_interrupt` events. This crate
//! rewrites that stream into `f:`/`0:`/`9:`/`a:`/`2:`/`e:`/`d:` parts, records
//! human-approval interrupts per conversation, and mirrors each finished turn
//! into a persistence sink.
//!
//! # Transcoding a captured body
//!
//! ```no_run
//! use agent_stream::prelude::*;
//! use futures::StreamExt as _;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":\"stop\"}]}\n\n";
//! let source = futures::stream::iter([Ok::<_, std::io::Error>(bytes::Bytes::from(body))]);
//! let mut out = Box::pin(transcode(source, TranscodeOptions::default()));
//! while let Some(chunk) = out.next().await {
//!     print!("{}", String::from_utf8_lossy(&chunk));
//! }
//! # }
//! ```

/// Chat turn orchestration (resume, upstream, transcoder, mirror).
pub mod chat;
/// Upstream agent server client.
pub mod client;
/// Conversation message types.
pub mod content;
/// Public error types.
pub mod errors;
/// Per-conversation pending interrupt storage.
pub mod interrupts;
/// Persistence tee for transcoded turns.
pub mod mirror;
/// Process-wide tracing setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Data-stream wire protocol.
pub mod protocol;
/// Resume signal encoding.
pub mod resume;
/// SSE line framing.
pub mod sse;
/// Upstream SSE to data-stream transcoder.
pub mod transcoder;
/// Upstream event payloads.
pub mod upstream;

pub use chat::{ChatService, ChatTurn, DataStream};
pub use client::{AgentClientConfig, ByteStream, HttpAgentClient, UpstreamAgent};
pub use content::{ChatMessage, ChatRole};
pub use errors::{PartDecodeError, ResumeParseError, SinkError, StreamError};
pub use interrupts::{InMemoryInterruptStore, InterruptStore};
pub use mirror::{MemoryTurnSink, PersistedTurn, ToolInvocation, TurnAccumulator, TurnSink, tee_to_sink, tee_to_sink_with};
pub use observability::init_observability;
pub use protocol::{Annotation, DataStreamPart, StepFinishReason, ToolCallPart, ToolResultPart, Usage};
pub use resume::{ResumeAction, ResumeSignal};
pub use transcoder::{InterruptCallback, TranscodeOptions, TranscodeStats, Transcoder, transcode};
pub use upstream::{AgentProgress, FinishReason, PendingInterrupt, ToolResultEvent, UpstreamEvent};
