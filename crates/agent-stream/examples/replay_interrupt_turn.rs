use std::sync::Arc;

use agent_stream::ByteStream;
use agent_stream::prelude::*;
use bytes::Bytes;
use futures::StreamExt as _;

/// Replays a captured agent-server turn that pauses for approval.
struct CapturedAgent;

const CAPTURED: &str = concat!(
    "data: {\"agent_progress\":{\"phase\":\"planning\",\"message\":\"Inspecting orders\"}}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"delete_rows\",\"arguments\":\"{\\\"table\\\":\\\"orders\\\"}\"}}]},\"finish_reason\":null}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
    "data: {\"tool_interrupt\":{\"toolCallId\":\"call_1\",\"toolName\":\"delete_rows\",\"prompt\":\"Delete rows from orders?\",\"details\":{},\"thread_id\":\"thread-1\"}}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

#[async_trait::async_trait]
impl UpstreamAgent for CapturedAgent {
    async fn start_stream(&self, _messages: Vec<ChatMessage>) -> Result<ByteStream, StreamError> {
        let chunks: Vec<Result<Bytes, StreamError>> = CAPTURED
            .as_bytes()
            .chunks(17)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), StreamError> {
    agent_stream::init_observability();

    let sink = Arc::new(MemoryTurnSink::new());
    let service = ChatService::new(
        Arc::new(CapturedAgent),
        Arc::new(InMemoryInterruptStore::new()),
        sink.clone(),
    );

    let turn = service
        .start_turn("demo", vec![ChatMessage::user("Clean up orders")], None)
        .await?;
    let mut stream = turn.stream;
    while let Some(chunk) = stream.next().await {
        print!("{}", String::from_utf8_lossy(&chunk));
    }
    let _ = turn.mirror.await;

    if let Some(pending) = service.pending_interrupt("demo") {
        println!("awaiting approval: {}", pending.prompt);
        let signal = ResumeSignal::new(ResumeAction::Approved, pending.thread_id);
        println!("resume with: {signal}");
    }
    println!("persisted turns: {}", sink.turns("demo").len());
    Ok(())
}
