//! Typed model of the agent server's SSE payloads.
//!
//! Each `data:` line carries one JSON object: either an OpenAI-style chat
//! completion chunk (`choices`) or one of the custom extension events
//! (`agent_progress`, `tool_result`, `tool_interrupt`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One element of `choices` in a streamed chat completion chunk.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ChunkChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl ChunkChoice {
    pub fn finish(&self) -> Option<FinishReason> {
        self.finish_reason.as_deref().map(FinishReason::from)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "reasoning")]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// A fragment of a tool call; fragments sharing `index` belong to one call.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Treats an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Upstream `finish_reason` values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// The model finished a round of tool calls; results follow.
    ToolCalls,
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl From<&str> for FinishReason {
    fn from(value: &str) -> Self {
        match value {
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// `agent_progress` extension event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentProgress {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<serde_json::Number>,
}

/// `tool_result` extension event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultEvent {
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    #[serde(
        rename = "toolName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub result: Value,
}

/// A turn paused on a tool call that needs human approval.
///
/// Produced from the upstream `tool_interrupt` event and held by an
/// [`InterruptStore`](crate::interrupts::InterruptStore) until the client
/// answers with a resume signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    #[serde(rename = "toolName", default)]
    pub tool_name: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub thread_id: String,
}

/// One decoded upstream event. A single line may carry several.
#[derive(Clone, Debug, PartialEq)]
pub enum UpstreamEvent {
    Choice(ChunkChoice),
    Progress(AgentProgress),
    ToolResult(ToolResultEvent),
    Interrupt(PendingInterrupt),
}

/// Decodes the JSON payload of one `data:` line.
///
/// Top-level fields are visited in document order, so the returned events
/// keep the order in which the upstream wrote them. Unknown fields (`id`,
/// `object`, `model`, ...) are skipped.
pub fn parse_upstream_line(payload: &str) -> Result<Vec<UpstreamEvent>, serde_json::Error> {
    let object: Map<String, Value> = serde_json::from_str(payload)?;
    let mut events = Vec::new();
    for (key, value) in object {
        match key.as_str() {
            "choices" => {
                let choices: Option<Vec<ChunkChoice>> = serde_json::from_value(value)?;
                events.extend(choices.unwrap_or_default().into_iter().map(UpstreamEvent::Choice));
            }
            "agent_progress" => {
                events.push(UpstreamEvent::Progress(serde_json::from_value(value)?));
            }
            "tool_result" => {
                events.push(UpstreamEvent::ToolResult(serde_json::from_value(value)?));
            }
            "tool_interrupt" => {
                events.push(UpstreamEvent::Interrupt(serde_json::from_value(value)?));
            }
            _ => {}
        }
    }
    Ok(events)
}
