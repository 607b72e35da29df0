//! Out-of-band approval signal for paused turns.
//!
//! The decision travels to the agent server as a synthetic user message whose
//! content is `RESUME:<action>:<threadId>`. That message is plumbing: it must
//! not be rendered or persisted as conversation content.

use std::fmt;
use std::str::FromStr;

use crate::content::{ChatMessage, ChatRole};
use crate::errors::ResumeParseError;

const RESUME_PREFIX: &str = "RESUME:";

/// Operator decision on a pending tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeAction {
    Approved,
    Denied,
    Skipped,
}

impl ResumeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeAction::Approved => "approved",
            ResumeAction::Denied => "denied",
            ResumeAction::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ResumeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResumeAction {
    type Err = ResumeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "approved" => Ok(ResumeAction::Approved),
            "denied" => Ok(ResumeAction::Denied),
            "skipped" => Ok(ResumeAction::Skipped),
            other => Err(ResumeParseError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResumeSignal {
    pub action: ResumeAction,
    pub thread_id: String,
}

impl ResumeSignal {
    pub fn new(action: ResumeAction, thread_id: impl Into<String>) -> Self {
        Self {
            action,
            thread_id: thread_id.into(),
        }
    }

    /// The synthetic user message sent upstream.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::user(self.to_string())
    }
}

impl fmt::Display for ResumeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{RESUME_PREFIX}{}:{}", self.action, self.thread_id)
    }
}

impl FromStr for ResumeSignal {
    type Err = ResumeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let rest = value
            .strip_prefix(RESUME_PREFIX)
            .ok_or(ResumeParseError::MissingPrefix)?;
        // Thread ids may themselves contain ':'.
        let (action, thread_id) = rest
            .split_once(':')
            .ok_or(ResumeParseError::MissingThreadId)?;
        if thread_id.is_empty() {
            return Err(ResumeParseError::MissingThreadId);
        }
        Ok(Self {
            action: action.parse()?,
            thread_id: thread_id.to_string(),
        })
    }
}

pub fn is_resume_signal(content: &str) -> bool {
    content.parse::<ResumeSignal>().is_ok()
}

/// Drops resume signals from user turns so they are neither rendered nor
/// persisted.
pub fn strip_resume_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| !(m.role == ChatRole::User && is_resume_signal(&m.content)))
        .cloned()
        .collect()
}
