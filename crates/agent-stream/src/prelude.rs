//! Common imports for typical usage.
//!
//! Covers the service wiring and the streaming entry points so application
//! code and demos need fewer import lines.
pub use crate::{
    ChatMessage, ChatService, ChatTurn, DataStreamPart, HttpAgentClient, InMemoryInterruptStore,
    InterruptStore, MemoryTurnSink, PendingInterrupt, ResumeAction, ResumeSignal, StreamError,
    TranscodeOptions, TurnSink, UpstreamAgent, transcode,
};
