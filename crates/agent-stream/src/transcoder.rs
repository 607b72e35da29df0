//! Upstream SSE to data-stream transcoder.
//!
//! [`Transcoder`] is a synchronous state machine fed with raw byte chunks;
//! [`transcode`] drives it over an async byte stream. One transcoder handles
//! exactly one chat turn.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt as _, stream};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::protocol::{
    Annotation, DataStreamPart, StepFinishReason, ToolCallPart, ToolResultPart, new_step_id,
};
use crate::sse::{LineDecoder, SseLine, parse_data_line};
use crate::upstream::{
    ChunkChoice, FinishReason, PendingInterrupt, ToolCallDelta, UpstreamEvent, parse_upstream_line,
};

/// Called once per upstream interrupt, before its annotation is emitted.
pub type InterruptCallback = Box<dyn FnMut(&PendingInterrupt) + Send>;

/// Per-turn transcoder options.
#[derive(Default)]
pub struct TranscodeOptions {
    on_interrupt: Option<InterruptCallback>,
}

impl TranscodeOptions {
    /// Registers the interrupt side channel.
    pub fn on_interrupt(mut self, callback: impl FnMut(&PendingInterrupt) + Send + 'static) -> Self {
        self.on_interrupt = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for TranscodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscodeOptions")
            .field("on_interrupt", &self.on_interrupt.is_some())
            .finish()
    }
}

/// Counters collected over one turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    pub lines: u64,
    pub malformed_lines: u64,
    pub steps: u32,
    pub tool_calls: u32,
    pub tool_results: u32,
    pub interrupts: u32,
}

#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn apply(&mut self, delta: ToolCallDelta) {
        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            self.id = id;
        }
        let Some(function) = delta.function else {
            return;
        };
        if let Some(name) = function.name.filter(|name| !name.is_empty())
            && self.name.is_empty()
        {
            self.name = name;
        }
        if let Some(arguments) = function.arguments {
            self.arguments.push_str(&arguments);
        }
    }

    fn finalize(self) -> ToolCallPart {
        let args = serde_json::from_str::<Value>(&self.arguments)
            .unwrap_or_else(|_| Value::String(self.arguments));
        ToolCallPart {
            tool_call_id: self.id,
            tool_name: self.name,
            args,
        }
    }
}

/// Stateful converter from upstream SSE bytes to [`DataStreamPart`]s.
pub struct Transcoder {
    lines: LineDecoder,
    options: TranscodeOptions,
    started: bool,
    step_open: bool,
    finished: bool,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    pending_annotations: Vec<DataStreamPart>,
    stats: TranscodeStats,
}

impl Transcoder {
    pub fn new(options: TranscodeOptions) -> Self {
        Self {
            lines: LineDecoder::new(),
            options,
            started: false,
            step_open: false,
            finished: false,
            tool_calls: BTreeMap::new(),
            pending_annotations: Vec::new(),
            stats: TranscodeStats::default(),
        }
    }

    /// Opens the first step. Idempotent; `push_chunk` and `finish` call it too.
    pub fn start(&mut self) -> Vec<DataStreamPart> {
        let mut out = Vec::new();
        self.ensure_started(&mut out);
        out
    }

    /// Feeds one chunk and returns the parts produced by every line it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<DataStreamPart> {
        let mut out = Vec::new();
        self.ensure_started(&mut out);
        for line in self.lines.push_chunk(chunk) {
            self.handle_line(&line, &mut out);
        }
        out
    }

    /// Processes the trailing partial line once the source is exhausted.
    pub fn finish(&mut self) -> Vec<DataStreamPart> {
        let mut out = Vec::new();
        self.ensure_started(&mut out);
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line, &mut out);
        }
        if !self.finished && !self.pending_annotations.is_empty() {
            self.ensure_step(&mut out);
        }
        out
    }

    pub fn stats(&self) -> TranscodeStats {
        self.stats
    }

    /// True once a terminal finish (`d:`) has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn ensure_started(&mut self, out: &mut Vec<DataStreamPart>) {
        if !self.started {
            self.started = true;
            self.ensure_step(out);
        }
    }

    fn ensure_step(&mut self, out: &mut Vec<DataStreamPart>) {
        if self.step_open {
            return;
        }
        let message_id = new_step_id();
        debug!(step = self.stats.steps, message_id = %message_id, "opening step");
        out.push(DataStreamPart::StartStep { message_id });
        self.step_open = true;
        self.stats.steps += 1;
        out.append(&mut self.pending_annotations);
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<DataStreamPart>) {
        match parse_data_line(line) {
            SseLine::Ignored => {}
            SseLine::Done => debug!("upstream sent [DONE]"),
            SseLine::Data(payload) => {
                self.stats.lines += 1;
                match parse_upstream_line(payload) {
                    Ok(events) => {
                        for event in events {
                            self.handle_event(event, out);
                        }
                    }
                    Err(err) => {
                        self.stats.malformed_lines += 1;
                        warn!(error = %err, payload_len = payload.len(), "dropping malformed upstream line");
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: UpstreamEvent, out: &mut Vec<DataStreamPart>) {
        if self.finished {
            debug!(?event, "ignoring upstream event after finish");
            return;
        }
        match event {
            UpstreamEvent::Choice(choice) => self.handle_choice(choice, out),
            UpstreamEvent::Progress(progress) => {
                self.annotate(Annotation::Progress(progress), out);
            }
            UpstreamEvent::ToolResult(result) => {
                self.ensure_step(out);
                self.stats.tool_results += 1;
                out.push(DataStreamPart::ToolResult(ToolResultPart {
                    tool_call_id: result.tool_call_id,
                    result: result.result,
                }));
            }
            UpstreamEvent::Interrupt(interrupt) => {
                self.stats.interrupts += 1;
                info!(
                    tool_call_id = %interrupt.tool_call_id,
                    tool_name = %interrupt.tool_name,
                    thread_id = %interrupt.thread_id,
                    "upstream requested tool approval"
                );
                if let Some(callback) = self.options.on_interrupt.as_mut() {
                    callback(&interrupt);
                }
                self.annotate(Annotation::ToolInterrupt(interrupt), out);
            }
        }
    }

    fn handle_choice(&mut self, choice: ChunkChoice, out: &mut Vec<DataStreamPart>) {
        let finish = choice.finish();
        let delta = choice.delta;

        if let Some(reasoning) = delta.reasoning_content.filter(|text| !text.is_empty()) {
            self.ensure_step(out);
            out.push(DataStreamPart::Reasoning(reasoning));
        }
        if let Some(fragments) = delta.tool_calls.filter(|calls| !calls.is_empty()) {
            self.ensure_step(out);
            for fragment in fragments {
                self.tool_calls
                    .entry(fragment.index)
                    .or_default()
                    .apply(fragment);
            }
        }
        if let Some(content) = delta.content.filter(|text| !text.is_empty()) {
            self.ensure_step(out);
            out.push(DataStreamPart::Text(content));
        }

        match finish {
            None => {}
            Some(FinishReason::ToolCalls) => {
                self.ensure_step(out);
                self.flush_tool_calls(out);
                out.push(DataStreamPart::finish_step(StepFinishReason::ToolCalls, true));
                self.step_open = false;
            }
            Some(reason) => {
                if reason != FinishReason::Stop {
                    warn!(upstream_reason = ?reason, "terminal finish reported as stop");
                }
                self.ensure_step(out);
                self.flush_tool_calls(out);
                out.push(DataStreamPart::finish_step(StepFinishReason::Stop, false));
                out.push(DataStreamPart::finish_message(StepFinishReason::Stop));
                self.step_open = false;
                self.finished = true;
                debug!(stats = ?self.stats, "turn finished");
            }
        }
    }

    fn flush_tool_calls(&mut self, out: &mut Vec<DataStreamPart>) {
        for (index, call) in std::mem::take(&mut self.tool_calls) {
            if call.id.is_empty() {
                warn!(index, name = %call.name, "tool call finished without an id");
            }
            self.stats.tool_calls += 1;
            out.push(DataStreamPart::ToolCall(call.finalize()));
        }
    }

    fn annotate(&mut self, annotation: Annotation, out: &mut Vec<DataStreamPart>) {
        let part = DataStreamPart::annotation(&annotation);
        if self.step_open {
            out.push(part);
        } else {
            self.pending_annotations.push(part);
        }
    }
}

fn encode_parts(parts: &[DataStreamPart]) -> Bytes {
    let mut buf = String::new();
    for part in parts {
        buf.push_str(&part.encode());
    }
    Bytes::from(buf)
}

/// Transcodes an upstream SSE byte stream into data-stream bytes.
///
/// The source is read one chunk at a time; every complete line of a chunk is
/// processed before the next chunk is requested. A read error ends the output
/// without a terminal record.
pub fn transcode<S, E>(source: S, options: TranscodeOptions) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    struct State<S> {
        source: Pin<Box<S>>,
        transcoder: Transcoder,
        pending: VecDeque<Bytes>,
        done: bool,
    }

    let mut transcoder = Transcoder::new(options);
    let mut pending = VecDeque::new();
    pending.push_back(encode_parts(&transcoder.start()));

    stream::unfold(
        State {
            source: Box::pin(source),
            transcoder,
            pending,
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(bytes) = state.pending.pop_front() {
                    return Some((bytes, state));
                }
                if state.done {
                    return None;
                }

                match state.source.next().await {
                    Some(Ok(chunk)) => {
                        let parts = state.transcoder.push_chunk(&chunk);
                        if !parts.is_empty() {
                            state.pending.push_back(encode_parts(&parts));
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, stats = ?state.transcoder.stats(), "upstream read failed; closing output");
                        state.done = true;
                    }
                    None => {
                        let parts = state.transcoder.finish();
                        if !parts.is_empty() {
                            state.pending.push_back(encode_parts(&parts));
                        }
                        debug!(stats = ?state.transcoder.stats(), "upstream stream ended");
                        state.done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn data(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    fn run_chunks(chunks: &[&[u8]], options: TranscodeOptions) -> Vec<DataStreamPart> {
        let mut transcoder = Transcoder::new(options);
        let mut parts = transcoder.start();
        for chunk in chunks {
            parts.extend(transcoder.push_chunk(chunk));
        }
        parts.extend(transcoder.finish());
        parts
    }

    fn run_body(body: &str) -> Vec<DataStreamPart> {
        run_chunks(&[body.as_bytes()], TranscodeOptions::default())
    }

    fn tags(parts: &[DataStreamPart]) -> Vec<&'static str> {
        parts.iter().map(DataStreamPart::tag).collect()
    }

    /// Step ids are random; blank them out so outputs can be compared.
    fn normalized(parts: Vec<DataStreamPart>) -> Vec<DataStreamPart> {
        parts
            .into_iter()
            .map(|part| match part {
                DataStreamPart::StartStep { .. } => DataStreamPart::StartStep {
                    message_id: String::new(),
                },
                other => other,
            })
            .collect()
    }

    const TOOL_CALL_START: &str = r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"query_database","arguments":""}}]},"finish_reason":null}]}"#;
    const TOOL_CALL_ARGS_1: &str = r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":"}}]},"finish_reason":null}]}"#;
    const TOOL_CALL_ARGS_2: &str = r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"revenue\"}"}}]},"finish_reason":null}]}"#;
    const FINISH_TOOL_CALLS: &str = r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#;
    const FINISH_STOP: &str = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
    const TOOL_RESULT: &str = r#"{"tool_result":{"toolCallId":"call_1","toolName":"query_database","result":{"row_count":3}}}"#;
    const INTERRUPT: &str = r#"{"tool_interrupt":{"toolCallId":"call_1","toolName":"query_database","prompt":"Run this query?","details":{"query":"revenue"},"thread_id":"thread-7"}}"#;

    fn scenario_two_body() -> String {
        [
            data(TOOL_CALL_START),
            data(TOOL_CALL_ARGS_1),
            data(TOOL_CALL_ARGS_2),
            data(FINISH_TOOL_CALLS),
            data(TOOL_RESULT),
            data(r#"{"choices":[{"delta":{"content":"Total is 3 rows."},"finish_reason":null}]}"#),
            data(FINISH_STOP),
            "data: [DONE]\n\n".to_string(),
        ]
        .concat()
    }

    #[test]
    fn plain_text_turn_opens_one_step() {
        let body = [
            data(r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#),
            data(FINISH_STOP),
        ]
        .concat();
        let parts = run_body(&body);
        assert_eq!(tags(&parts), vec!["f", "0", "e", "d"]);
        assert_eq!(parts[1], DataStreamPart::Text("Hi".into()));
        assert_eq!(
            parts[2],
            DataStreamPart::finish_step(StepFinishReason::Stop, false)
        );
        assert_eq!(
            parts[3],
            DataStreamPart::finish_message(StepFinishReason::Stop)
        );
    }

    #[test]
    fn single_tool_round_spans_two_steps() {
        let parts = run_body(&scenario_two_body());
        assert_eq!(tags(&parts), vec!["f", "9", "e", "f", "a", "0", "e", "d"]);
        assert_eq!(
            parts[1],
            DataStreamPart::ToolCall(ToolCallPart {
                tool_call_id: "call_1".into(),
                tool_name: "query_database".into(),
                args: serde_json::json!({"query": "revenue"}),
            })
        );
        assert_eq!(
            parts[2],
            DataStreamPart::finish_step(StepFinishReason::ToolCalls, true)
        );
        assert_eq!(
            parts[4],
            DataStreamPart::ToolResult(ToolResultPart {
                tool_call_id: "call_1".into(),
                result: serde_json::json!({"row_count": 3}),
            })
        );
        let (DataStreamPart::StartStep { message_id: first }, DataStreamPart::StartStep { message_id: second }) =
            (&parts[0], &parts[3])
        else {
            panic!("expected step starts");
        };
        assert_ne!(first, second);
    }

    const SPLIT_SIZES: [usize; 6] = [1, 2, 3, 7, 16, 64];

    /// Runs `body` whole and re-chunked; returns the whole-body output.
    fn assert_split_invariant(body: &str) -> Vec<DataStreamPart> {
        let whole = normalized(run_body(body));
        for size in SPLIT_SIZES {
            let chunks: Vec<&[u8]> = body.as_bytes().chunks(size).collect();
            let split = normalized(run_chunks(&chunks, TranscodeOptions::default()));
            assert_eq!(split, whole, "chunk size {size}");
        }
        whole
    }

    #[test]
    fn arbitrary_chunk_boundaries_do_not_change_output() {
        assert_split_invariant(&scenario_two_body());
    }

    #[test]
    fn interrupt_turn_is_split_invariant_and_fires_callback_once() {
        let body = [
            data(TOOL_CALL_START),
            data(TOOL_CALL_ARGS_1),
            data(TOOL_CALL_ARGS_2),
            data(FINISH_TOOL_CALLS),
            data(INTERRUPT),
            data(FINISH_STOP),
        ]
        .concat();
        let whole = assert_split_invariant(&body);
        assert_eq!(tags(&whole), vec!["f", "9", "e", "f", "2", "e", "d"]);

        for size in SPLIT_SIZES {
            let count = Arc::new(Mutex::new(0u32));
            let counter = count.clone();
            let options = TranscodeOptions::default().on_interrupt(move |_| {
                *counter.lock().expect("lock") += 1;
            });
            let chunks: Vec<&[u8]> = body.as_bytes().chunks(size).collect();
            let _ = run_chunks(&chunks, options);
            assert_eq!(*count.lock().expect("lock"), 1, "chunk size {size}");
        }
    }

    #[test]
    fn buffered_annotations_are_split_invariant() {
        let body = [
            data(TOOL_CALL_START),
            data(FINISH_TOOL_CALLS),
            data(r#"{"agent_progress":{"phase":"executing","message":"Running query","step":1,"total":2}}"#),
            data(TOOL_RESULT),
            data(FINISH_STOP),
        ]
        .concat();
        let whole = assert_split_invariant(&body);
        assert_eq!(tags(&whole), vec!["f", "9", "e", "f", "2", "a", "e", "d"]);
    }

    #[test]
    fn multibyte_reasoning_and_malformed_lines_are_split_invariant() {
        let body = [
            data(r#"{"choices":[{"delta":{"reasoning_content":"Überlege… 🤔"},"finish_reason":null}]}"#),
            "data: {not valid json\n\n".to_string(),
            data(r#"{"choices":[{"delta":{"content":"Grüße, 世界 👋"},"finish_reason":null}]}"#),
            data(FINISH_STOP),
        ]
        .concat();
        let whole = assert_split_invariant(&body);
        assert_eq!(tags(&whole), vec!["f", "g", "0", "e", "d"]);
        assert_eq!(whole[1], DataStreamPart::Reasoning("Überlege… 🤔".into()));
        assert_eq!(whole[2], DataStreamPart::Text("Grüße, 世界 👋".into()));
    }

    #[test]
    fn null_delta_finish_still_ends_turn() {
        let parts = run_body(&data(r#"{"choices":[{"delta":null,"finish_reason":"stop"}]}"#));
        assert_eq!(tags(&parts), vec!["f", "e", "d"]);
    }

    #[test]
    fn interrupt_fires_callback_once_and_ends_turn_with_annotation() {
        let seen: Arc<Mutex<Vec<PendingInterrupt>>> = Arc::default();
        let sink = seen.clone();
        let options = TranscodeOptions::default().on_interrupt(move |interrupt| {
            sink.lock().expect("lock").push(interrupt.clone());
        });
        let body = [
            data(TOOL_CALL_START),
            data(TOOL_CALL_ARGS_1),
            data(TOOL_CALL_ARGS_2),
            data(FINISH_TOOL_CALLS),
            data(INTERRUPT),
            data(FINISH_STOP),
        ]
        .concat();
        let parts = run_chunks(&[body.as_bytes()], options);

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].thread_id, "thread-7");

        let n = parts.len();
        assert_eq!(tags(&parts[n - 3..]), vec!["2", "e", "d"]);
        let DataStreamPart::Annotations(items) = &parts[n - 3] else {
            panic!("expected annotation");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["type"], "tool_interrupt");
        assert_eq!(items[0]["toolCallId"], seen[0].tool_call_id.as_str());
        assert_eq!(items[0]["prompt"], seen[0].prompt.as_str());
        assert_eq!(items[0]["thread_id"], seen[0].thread_id.as_str());
        assert_eq!(
            items[0]["details"],
            Value::Object(seen[0].details.clone())
        );
        assert!(!parts.iter().any(|p| matches!(p, DataStreamPart::ToolResult(_))));
    }

    #[test]
    fn callback_runs_before_annotation_is_produced() {
        let fired = Arc::new(Mutex::new(false));
        let flag = fired.clone();
        let mut transcoder = Transcoder::new(TranscodeOptions::default().on_interrupt(move |_| {
            *flag.lock().expect("lock") = true;
        }));
        let _ = transcoder.start();
        assert!(!*fired.lock().expect("lock"));
        let parts = transcoder.push_chunk(data(INTERRUPT).as_bytes());
        assert!(*fired.lock().expect("lock"));
        assert_eq!(tags(&parts), vec!["2"]);
        assert_eq!(transcoder.stats().interrupts, 1);
    }

    #[test]
    fn annotations_while_step_closed_are_flushed_after_next_step_opens() {
        let body = [
            data(TOOL_CALL_START),
            data(FINISH_TOOL_CALLS),
            data(r#"{"agent_progress":{"phase":"executing","message":"Running query","step":1,"total":2}}"#),
            data(r#"{"agent_progress":{"phase":"executing","message":"Still running"}}"#),
            data(TOOL_RESULT),
            data(FINISH_STOP),
        ]
        .concat();
        let parts = run_body(&body);
        assert_eq!(
            tags(&parts),
            vec!["f", "9", "e", "f", "2", "2", "a", "e", "d"]
        );
        let DataStreamPart::Annotations(first) = &parts[4] else {
            panic!("expected annotation");
        };
        assert_eq!(first[0]["message"], "Running query");
        assert_eq!(first[0]["type"], "agent_progress");
    }

    #[test]
    fn annotations_inside_open_step_are_emitted_in_place() {
        let body = [
            data(r#"{"agent_progress":{"phase":"planning","message":"Thinking"}}"#),
            data(r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":null}]}"#),
        ]
        .concat();
        let parts = run_body(&body);
        assert_eq!(tags(&parts), vec!["f", "2", "0"]);
    }

    #[test]
    fn fields_of_one_line_keep_upstream_order() {
        let body = [
            data(FINISH_TOOL_CALLS),
            data(r#"{"tool_result":{"toolCallId":"a","result":1},"agent_progress":{"phase":"p","message":"m"}}"#),
        ]
        .concat();
        let parts = run_body(&body);
        assert_eq!(tags(&parts), vec!["f", "e", "f", "a", "2"]);
    }

    #[test]
    fn malformed_line_is_dropped_and_processing_continues() {
        let body = [
            "data: {not valid json\n\n".to_string(),
            data(r#"{"choices":[{"delta":{"content":"still here"},"finish_reason":null}]}"#),
            data(FINISH_STOP),
        ]
        .concat();
        let mut transcoder = Transcoder::new(TranscodeOptions::default());
        let mut parts = transcoder.push_chunk(body.as_bytes());
        parts.extend(transcoder.finish());
        assert_eq!(tags(&parts), vec!["f", "0", "e", "d"]);
        assert_eq!(transcoder.stats().malformed_lines, 1);
    }

    #[test]
    fn reasoning_and_unparseable_arguments_pass_through() {
        let body = [
            data(r#"{"choices":[{"delta":{"reasoning_content":"Need data."},"finish_reason":null}]}"#),
            data(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"lookup","arguments":"{\"q\":"}}]},"finish_reason":null}]}"#),
            data(FINISH_TOOL_CALLS),
        ]
        .concat();
        let parts = run_body(&body);
        assert_eq!(tags(&parts), vec!["f", "g", "9", "e"]);
        assert_eq!(parts[1], DataStreamPart::Reasoning("Need data.".into()));
        let DataStreamPart::ToolCall(call) = &parts[2] else {
            panic!("expected tool call");
        };
        assert_eq!(call.args, Value::String("{\"q\":".into()));
    }

    #[test]
    fn parallel_tool_calls_are_emitted_in_index_order() {
        let body = [
            data(r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"c2","function":{"name":"retrieve_documents","arguments":"{}"}},{"index":0,"id":"c1","function":{"name":"query_database","arguments":"{}"}}]},"finish_reason":null}]}"#),
            data(FINISH_TOOL_CALLS),
        ]
        .concat();
        let parts = run_body(&body);
        let ids: Vec<_> = parts
            .iter()
            .filter_map(|part| match part {
                DataStreamPart::ToolCall(call) => Some(call.tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn multi_round_tool_use_opens_a_step_per_round() {
        let body = [
            data(TOOL_CALL_START),
            data(FINISH_TOOL_CALLS),
            data(TOOL_RESULT),
            data(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_2","function":{"name":"retrieve_documents","arguments":"{\"top_k\":2}"}}]},"finish_reason":null}]}"#),
            data(FINISH_TOOL_CALLS),
            data(r#"{"tool_result":{"toolCallId":"call_2","result":[]}}"#),
            data(r#"{"choices":[{"delta":{"content":"Done"},"finish_reason":null}]}"#),
            data(FINISH_STOP),
        ]
        .concat();
        let parts = run_body(&body);
        assert_eq!(
            tags(&parts),
            vec!["f", "9", "e", "f", "a", "9", "e", "f", "a", "0", "e", "d"]
        );
        assert_eq!(count_steps(&parts), 3);
    }

    fn count_steps(parts: &[DataStreamPart]) -> usize {
        parts
            .iter()
            .filter(|p| matches!(p, DataStreamPart::StartStep { .. }))
            .count()
    }

    #[test]
    fn trailing_line_without_newline_is_flushed_at_end() {
        let body = format!(
            "data: {}\n\ndata: {}",
            r#"{"choices":[{"delta":{"content":"a"},"finish_reason":null}]}"#,
            FINISH_STOP
        );
        let parts = run_body(&body);
        assert_eq!(tags(&parts), vec!["f", "0", "e", "d"]);
    }

    #[test]
    fn buffered_annotation_survives_stream_end_without_finish() {
        let body = [data(FINISH_TOOL_CALLS), data(INTERRUPT)].concat();
        let parts = run_body(&body);
        assert_eq!(tags(&parts), vec!["f", "e", "f", "2"]);
    }

    #[test]
    fn events_after_finish_are_ignored() {
        let body = [
            data(FINISH_STOP),
            data(r#"{"choices":[{"delta":{"content":"late"},"finish_reason":null}]}"#),
        ]
        .concat();
        let parts = run_body(&body);
        assert_eq!(tags(&parts), vec!["f", "e", "d"]);
    }

    #[test]
    fn non_stop_terminal_reasons_are_reported_as_stop() {
        for reason in ["length", "content_filter", "max_output_reached"] {
            let line = format!(r#"{{"choices":[{{"delta":{{}},"finish_reason":"{reason}"}}]}}"#);
            let parts = run_body(&data(&line));
            assert_eq!(
                parts[1..],
                [
                    DataStreamPart::finish_step(StepFinishReason::Stop, false),
                    DataStreamPart::finish_message(StepFinishReason::Stop),
                ],
                "finish reason {reason}"
            );
            let encoded: String = parts.iter().map(DataStreamPart::encode).collect();
            assert!(encoded.contains(r#""finishReason":"stop""#));
            assert!(!encoded.contains(reason));
        }
    }

    #[test]
    fn keepalive_and_comment_lines_produce_nothing() {
        let parts = run_body(": ping\n\nevent: message\nretry: 10\n\n");
        assert_eq!(tags(&parts), vec!["f"]);
    }

    #[tokio::test]
    async fn async_transcode_matches_sync_output() {
        let body = scenario_two_body();
        let chunks: Vec<Result<Bytes, std::io::Error>> = body
            .as_bytes()
            .chunks(5)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let output: Vec<Bytes> = transcode(stream::iter(chunks), TranscodeOptions::default())
            .collect()
            .await;
        let text: String = output
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();
        let parsed: Vec<DataStreamPart> = text
            .lines()
            .map(|line| DataStreamPart::parse_line(line).expect("valid part"))
            .collect();
        assert_eq!(normalized(parsed), normalized(run_body(&body)));
    }

    #[tokio::test]
    async fn read_error_closes_output_without_terminal_record() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from(data(
                r#"{"choices":[{"delta":{"content":"partial"},"finish_reason":null}]}"#,
            ))),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from(data(FINISH_STOP))),
        ];
        let output: Vec<Bytes> = transcode(stream::iter(chunks), TranscodeOptions::default())
            .collect()
            .await;
        let text: String = output
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();
        let tags: Vec<&str> = text.lines().map(|line| &line[..1]).collect();
        assert_eq!(tags, vec!["f", "0"]);
    }
}
