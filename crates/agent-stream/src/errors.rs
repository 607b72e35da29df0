/// Errors raised while establishing or validating a chat turn.
///
/// Failures that happen after the client stream is live (malformed upstream
/// lines, read errors, mirror failures) are logged instead of returned, so
/// they never show up here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid client or service configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (empty conversation id, no messages, ...).
    #[error("validation error: {0}")]
    Validation(String),
    /// Upstream agent server answered with a non-success status.
    #[error("upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },
    /// Connecting to or reading from the upstream failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl StreamError {
    pub(crate) fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Failure reported by a [`TurnSink`](crate::mirror::TurnSink).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The backing store rejected the write.
    #[error("persist failed for conversation {conversation_id}: {message}")]
    Persist {
        conversation_id: String,
        message: String,
    },
    /// The sink is no longer accepting writes.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Returned when a message does not carry a well-formed resume signal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResumeParseError {
    #[error("missing RESUME: prefix")]
    MissingPrefix,
    #[error("unknown resume action: {0}")]
    UnknownAction(String),
    #[error("resume signal has no thread id")]
    MissingThreadId,
}

/// Returned by [`DataStreamPart::parse_line`](crate::protocol::DataStreamPart::parse_line).
#[derive(Debug, thiserror::Error)]
pub enum PartDecodeError {
    #[error("line has no `<tag>:` prefix")]
    MissingTag,
    #[error("unknown part tag: {0}")]
    UnknownTag(String),
    #[error("invalid payload for part `{tag}`: {source}")]
    Payload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}
