//! Upstream agent server client.
//!
//! [`UpstreamAgent`] is the seam between chat turns and the agent server;
//! [`HttpAgentClient`] is the reqwest implementation. Tests substitute fakes
//! that replay captured SSE bodies.
mod config;
mod http;

use std::pin::Pin;

use bytes::Bytes;

pub use config::AgentClientConfig;
pub use http::HttpAgentClient;

use crate::content::ChatMessage;
use crate::errors::StreamError;

/// Raw SSE body of one upstream response.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, StreamError>> + Send + 'static>>;

/// Starts streamed chat completions on the agent server.
#[async_trait::async_trait]
pub trait UpstreamAgent: Send + Sync {
    /// Sends the conversation and returns the response body once headers
    /// arrived with a success status.
    async fn start_stream(&self, messages: Vec<ChatMessage>) -> Result<ByteStream, StreamError>;
}
