//! The multiplexed data-stream protocol consumed by the chat frontend.
//!
//! Every part is one line: `<tag>:<JSON>\n`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::PartDecodeError;
use crate::upstream::{AgentProgress, PendingInterrupt};

/// Token usage attached to finish parts. The agent server does not report
/// usage, so this is always zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Finish reasons as spelled on the wire. The frontend only understands
/// these two; every terminal upstream reason is reported as `stop`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepFinishReason {
    Stop,
    ToolCalls,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub result: Value,
}

/// Message annotations carried by `2:` parts.
#[derive(Clone, Debug, PartialEq)]
pub enum Annotation {
    Progress(AgentProgress),
    ToolInterrupt(PendingInterrupt),
}

impl Annotation {
    pub fn kind(&self) -> &'static str {
        match self {
            Annotation::Progress(_) => "agent_progress",
            Annotation::ToolInterrupt(_) => "tool_interrupt",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Annotation::Progress(progress) => {
                let mut value = json!({
                    "type": self.kind(),
                    "phase": progress.phase,
                    "message": progress.message,
                });
                if let Some(step) = &progress.step {
                    value["step"] = Value::Number(step.clone());
                }
                if let Some(total) = &progress.total {
                    value["total"] = Value::Number(total.clone());
                }
                value
            }
            Annotation::ToolInterrupt(interrupt) => json!({
                "type": self.kind(),
                "toolCallId": interrupt.tool_call_id,
                "toolName": interrupt.tool_name,
                "prompt": interrupt.prompt,
                "details": interrupt.details,
                "thread_id": interrupt.thread_id,
            }),
        }
    }
}

/// One line of the output protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum DataStreamPart {
    /// `f:` opens a step.
    StartStep { message_id: String },
    /// `g:` reasoning token.
    Reasoning(String),
    /// `0:` text token.
    Text(String),
    /// `9:` a complete tool call.
    ToolCall(ToolCallPart),
    /// `a:` result of a tool call.
    ToolResult(ToolResultPart),
    /// `2:` annotation list.
    Annotations(Vec<Value>),
    /// `e:` closes a step.
    FinishStep {
        finish_reason: StepFinishReason,
        usage: Usage,
        is_continued: bool,
    },
    /// `d:` ends the message.
    FinishMessage {
        finish_reason: StepFinishReason,
        usage: Usage,
    },
}

impl DataStreamPart {
    pub fn start_step() -> Self {
        DataStreamPart::StartStep {
            message_id: new_step_id(),
        }
    }

    pub fn annotation(annotation: &Annotation) -> Self {
        DataStreamPart::Annotations(vec![annotation.to_value()])
    }

    pub fn finish_step(finish_reason: StepFinishReason, is_continued: bool) -> Self {
        DataStreamPart::FinishStep {
            finish_reason,
            usage: Usage::default(),
            is_continued,
        }
    }

    pub fn finish_message(finish_reason: StepFinishReason) -> Self {
        DataStreamPart::FinishMessage {
            finish_reason,
            usage: Usage::default(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            DataStreamPart::StartStep { .. } => "f",
            DataStreamPart::Reasoning(_) => "g",
            DataStreamPart::Text(_) => "0",
            DataStreamPart::ToolCall(_) => "9",
            DataStreamPart::ToolResult(_) => "a",
            DataStreamPart::Annotations(_) => "2",
            DataStreamPart::FinishStep { .. } => "e",
            DataStreamPart::FinishMessage { .. } => "d",
        }
    }

    fn payload(&self) -> Value {
        match self {
            DataStreamPart::StartStep { message_id } => json!({ "messageId": message_id }),
            DataStreamPart::Reasoning(text) | DataStreamPart::Text(text) => {
                Value::String(text.clone())
            }
            DataStreamPart::ToolCall(call) => json!({
                "toolCallId": call.tool_call_id,
                "toolName": call.tool_name,
                "args": call.args,
            }),
            DataStreamPart::ToolResult(result) => json!({
                "toolCallId": result.tool_call_id,
                "result": result.result,
            }),
            DataStreamPart::Annotations(items) => Value::Array(items.clone()),
            DataStreamPart::FinishStep {
                finish_reason,
                usage,
                is_continued,
            } => json!({
                "finishReason": finish_reason,
                "usage": usage,
                "isContinued": is_continued,
            }),
            DataStreamPart::FinishMessage {
                finish_reason,
                usage,
            } => json!({
                "finishReason": finish_reason,
                "usage": usage,
            }),
        }
    }

    /// Encodes the part as a protocol line, trailing newline included.
    pub fn encode(&self) -> String {
        format!("{}:{}\n", self.tag(), self.payload())
    }

    /// Decodes one protocol line (with or without its trailing newline).
    pub fn parse_line(line: &str) -> Result<Self, PartDecodeError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (tag, payload) = line.split_once(':').ok_or(PartDecodeError::MissingTag)?;
        let decode_err = |source| PartDecodeError::Payload {
            tag: tag.to_string(),
            source,
        };
        let part = match tag {
            "f" => {
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct StartStep {
                    message_id: String,
                }
                let step: StartStep = serde_json::from_str(payload).map_err(decode_err)?;
                DataStreamPart::StartStep {
                    message_id: step.message_id,
                }
            }
            "g" => DataStreamPart::Reasoning(serde_json::from_str(payload).map_err(decode_err)?),
            "0" => DataStreamPart::Text(serde_json::from_str(payload).map_err(decode_err)?),
            "9" => DataStreamPart::ToolCall(serde_json::from_str(payload).map_err(decode_err)?),
            "a" => DataStreamPart::ToolResult(serde_json::from_str(payload).map_err(decode_err)?),
            "2" => {
                DataStreamPart::Annotations(serde_json::from_str(payload).map_err(decode_err)?)
            }
            "e" => {
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct FinishStep {
                    finish_reason: StepFinishReason,
                    #[serde(default)]
                    usage: Usage,
                    #[serde(default)]
                    is_continued: bool,
                }
                let step: FinishStep = serde_json::from_str(payload).map_err(decode_err)?;
                DataStreamPart::FinishStep {
                    finish_reason: step.finish_reason,
                    usage: step.usage,
                    is_continued: step.is_continued,
                }
            }
            "d" => {
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct FinishMessage {
                    finish_reason: StepFinishReason,
                    #[serde(default)]
                    usage: Usage,
                }
                let message: FinishMessage = serde_json::from_str(payload).map_err(decode_err)?;
                DataStreamPart::FinishMessage {
                    finish_reason: message.finish_reason,
                    usage: message.usage,
                }
            }
            other => return Err(PartDecodeError::UnknownTag(other.to_string())),
        };
        Ok(part)
    }
}

/// Fresh step identifier: `msg-` plus 16 hex chars.
pub fn new_step_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("msg-{}", &id[..16])
}
