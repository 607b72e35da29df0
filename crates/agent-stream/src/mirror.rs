//! Persistence mirror for the client-facing data stream.
//!
//! The transcoded stream is teed: the client gets every chunk unchanged while
//! a background task rebuilds the assistant message from the same bytes and
//! hands it to a [`TurnSink`]. Only tool calls that received a result are
//! persisted, so a re-synced conversation never shows an interrupted or
//! abandoned call as completed.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::SinkError;
use crate::protocol::{DataStreamPart, StepFinishReason, ToolCallPart};
use crate::sse::LineDecoder;

/// A tool call that ran to completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
    pub result: Value,
}

/// The assistant message rebuilt from one turn's data stream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTurn {
    pub text: String,
    pub reasoning: String,
    pub tool_invocations: Vec<ToolInvocation>,
    pub finish_reason: Option<StepFinishReason>,
}

#[derive(Debug)]
struct CallRecord {
    tool_call_id: String,
    tool_name: String,
    args: Value,
    result: Option<Value>,
}

/// Rebuilds a [`PersistedTurn`] from encoded data-stream bytes.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    lines: LineDecoder,
    text: String,
    reasoning: String,
    calls: Vec<CallRecord>,
    by_id: HashMap<String, usize>,
    finish_reason: Option<StepFinishReason>,
    undecodable_lines: u64,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) {
        for line in self.lines.push_chunk(chunk) {
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        match DataStreamPart::parse_line(line) {
            Ok(part) => self.push_part(part),
            Err(err) => {
                self.undecodable_lines += 1;
                warn!(error = %err, "mirror skipped undecodable data-stream line");
            }
        }
    }

    pub fn push_part(&mut self, part: DataStreamPart) {
        match part {
            DataStreamPart::Text(text) => self.text.push_str(&text),
            DataStreamPart::Reasoning(text) => self.reasoning.push_str(&text),
            DataStreamPart::ToolCall(call) => {
                if let Some(&idx) = self.by_id.get(&call.tool_call_id) {
                    let record = &mut self.calls[idx];
                    record.tool_name = call.tool_name;
                    record.args = call.args;
                } else {
                    self.by_id.insert(call.tool_call_id.clone(), self.calls.len());
                    self.calls.push(CallRecord {
                        tool_call_id: call.tool_call_id,
                        tool_name: call.tool_name,
                        args: call.args,
                        result: None,
                    });
                }
            }
            DataStreamPart::ToolResult(result) => match self.by_id.get(&result.tool_call_id) {
                Some(&idx) => self.calls[idx].result = Some(result.result),
                None => {
                    debug!(tool_call_id = %result.tool_call_id, "tool result without a matching call");
                }
            },
            DataStreamPart::FinishMessage { finish_reason, .. } => {
                self.finish_reason = Some(finish_reason);
            }
            DataStreamPart::StartStep { .. }
            | DataStreamPart::Annotations(_)
            | DataStreamPart::FinishStep { .. } => {}
        }
    }

    /// Registers a call emitted in an earlier turn so a result arriving in
    /// this turn is persisted as a completed invocation.
    pub fn expect_call(&mut self, tool_call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) {
        self.push_part(DataStreamPart::ToolCall(ToolCallPart {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
        }));
    }

    /// Lines that could not be decoded so far.
    pub fn undecodable_lines(&self) -> u64 {
        self.undecodable_lines
    }

    pub fn finish(mut self) -> PersistedTurn {
        if let Some(line) = self.lines.finish() {
            self.push_line(&line);
        }
        let dropped = self.calls.iter().filter(|c| c.result.is_none()).count();
        if dropped > 0 {
            debug!(dropped, "omitting tool calls without results from persisted turn");
        }
        let tool_invocations = self
            .calls
            .into_iter()
            .filter_map(|call| {
                call.result.map(|result| ToolInvocation {
                    tool_call_id: call.tool_call_id,
                    tool_name: call.tool_name,
                    args: call.args,
                    result,
                })
            })
            .collect();
        PersistedTurn {
            text: self.text,
            reasoning: self.reasoning,
            tool_invocations,
            finish_reason: self.finish_reason,
        }
    }
}

/// Destination for rebuilt assistant messages (database, file, ...).
#[async_trait::async_trait]
pub trait TurnSink: Send + Sync {
    async fn persist(&self, conversation_id: &str, turn: PersistedTurn) -> Result<(), SinkError>;
}

/// Keeps persisted turns in memory, grouped by conversation.
#[derive(Debug, Default)]
pub struct MemoryTurnSink {
    turns: DashMap<String, Vec<PersistedTurn>>,
}

impl MemoryTurnSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self, conversation_id: &str) -> Vec<PersistedTurn> {
        self.turns
            .get(conversation_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl TurnSink for MemoryTurnSink {
    async fn persist(&self, conversation_id: &str, turn: PersistedTurn) -> Result<(), SinkError> {
        self.turns
            .entry(conversation_id.to_string())
            .or_default()
            .push(turn);
        Ok(())
    }
}

/// Tees `stream` into a mirror task that persists the rebuilt turn once the
/// stream ends or is dropped.
///
/// Must be called inside a tokio runtime. The returned stream yields exactly
/// the input chunks; mirror failures are logged and never reach the client.
pub fn tee_to_sink<S>(
    stream: S,
    conversation_id: &str,
    sink: Arc<dyn TurnSink>,
) -> (impl Stream<Item = Bytes> + Send + use<S>, JoinHandle<()>)
where
    S: Stream<Item = Bytes> + Send + 'static,
{
    tee_to_sink_with(stream, conversation_id, TurnAccumulator::new(), sink)
}

/// Like [`tee_to_sink`], but rebuilds the turn on top of `accumulator`
/// (for example one seeded with the call a resumed turn completes).
pub fn tee_to_sink_with<S>(
    stream: S,
    conversation_id: &str,
    mut accumulator: TurnAccumulator,
    sink: Arc<dyn TurnSink>,
) -> (impl Stream<Item = Bytes> + Send + use<S>, JoinHandle<()>)
where
    S: Stream<Item = Bytes> + Send + 'static,
{
    let conversation_id = conversation_id.to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let mirror = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            accumulator.push_bytes(&chunk);
        }
        let turn = accumulator.finish();
        debug!(
            conversation_id = %conversation_id,
            text_len = turn.text.len(),
            tool_invocations = turn.tool_invocations.len(),
            "persisting turn"
        );
        if let Err(err) = sink.persist(&conversation_id, turn).await {
            warn!(conversation_id = %conversation_id, error = %err, "failed to persist turn");
        }
    });

    let mut mirror_alive = true;
    let client = stream.inspect(move |chunk| {
        if mirror_alive && tx.send(chunk.clone()).is_err() {
            mirror_alive = false;
            warn!("persistence mirror stopped; continuing client stream only");
        }
    });
    (client, mirror)
}
