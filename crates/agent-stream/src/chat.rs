//! Chat turn orchestration.
//!
//! Wires one turn end to end: resume handling, the upstream request, the
//! transcoder with its interrupt side channel, and the persistence tee.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::UpstreamAgent;
use crate::content::ChatMessage;
use crate::errors::StreamError;
use crate::interrupts::InterruptStore;
use crate::mirror::{TurnAccumulator, TurnSink, tee_to_sink_with};
use crate::resume::{ResumeSignal, strip_resume_messages};
use crate::transcoder::{TranscodeOptions, transcode};
use crate::upstream::PendingInterrupt;

/// Client-facing data stream of one turn.
pub type DataStream = Pin<Box<dyn Stream<Item = Bytes> + Send + 'static>>;

/// A running turn.
pub struct ChatTurn {
    /// Data-stream bytes to forward to the client unchanged.
    pub stream: DataStream,
    /// Mirror task; completes after the turn has been handed to the sink.
    pub mirror: JoinHandle<()>,
}

/// Entry point used by the chat route.
#[derive(Clone)]
pub struct ChatService {
    upstream: Arc<dyn UpstreamAgent>,
    interrupts: Arc<dyn InterruptStore>,
    sink: Arc<dyn TurnSink>,
}

impl ChatService {
    pub fn new(
        upstream: Arc<dyn UpstreamAgent>,
        interrupts: Arc<dyn InterruptStore>,
        sink: Arc<dyn TurnSink>,
    ) -> Self {
        Self {
            upstream,
            interrupts,
            sink,
        }
    }

    /// Pending approval for `conversation_id`, if the last turn paused.
    pub fn pending_interrupt(&self, conversation_id: &str) -> Option<PendingInterrupt> {
        self.interrupts.get(conversation_id)
    }

    /// Starts a turn. With `resume`, the decision is appended as the
    /// synthetic resume message and the pending interrupt is cleared once the
    /// upstream accepted the request; a refused request leaves it pending.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn start_turn(
        &self,
        conversation_id: &str,
        messages: Vec<ChatMessage>,
        resume: Option<ResumeSignal>,
    ) -> Result<ChatTurn, StreamError> {
        if conversation_id.trim().is_empty() {
            return Err(StreamError::Validation(
                "conversation id must not be empty".into(),
            ));
        }
        let mut messages = strip_resume_messages(&messages);
        if messages.is_empty() && resume.is_none() {
            return Err(StreamError::Validation(
                "at least one message is required".into(),
            ));
        }
        let mut resumed = None;
        if let Some(signal) = &resume {
            resumed = self.interrupts.get(conversation_id);
            if let Some(pending) = &resumed
                && pending.thread_id != signal.thread_id
            {
                debug!(
                    conversation_id,
                    pending_thread = %pending.thread_id,
                    resume_thread = %signal.thread_id,
                    "resume targets a different thread than the pending interrupt"
                );
            }
            info!(conversation_id, action = %signal.action, thread_id = %signal.thread_id, "resuming paused turn");
            messages.push(signal.to_message());
        }

        let body = self.upstream.start_stream(messages).await?;

        // The paused call was emitted last turn; its result arrives in this one.
        let mut accumulator = TurnAccumulator::new();
        if resume.is_some() {
            self.interrupts.clear(conversation_id);
            if let Some(pending) = resumed {
                accumulator.expect_call(
                    pending.tool_call_id,
                    pending.tool_name,
                    Value::Object(pending.details),
                );
            }
        }

        let store = self.interrupts.clone();
        let key = conversation_id.to_string();
        let options = TranscodeOptions::default().on_interrupt(move |interrupt| {
            store.set(&key, interrupt.clone());
        });
        let (stream, mirror) = tee_to_sink_with(
            transcode(body, options),
            conversation_id,
            accumulator,
            self.sink.clone(),
        );
        Ok(ChatTurn {
            stream: Box::pin(stream),
            mirror,
        })
    }
}
