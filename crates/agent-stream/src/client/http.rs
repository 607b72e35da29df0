use futures::StreamExt as _;
use tracing::debug;

use super::config::AgentClientConfig;
use super::{ByteStream, UpstreamAgent};
use crate::content::ChatMessage;
use crate::errors::StreamError;

/// reqwest-backed client for an OpenAI-compatible agent server.
pub struct HttpAgentClient {
    client: reqwest::Client,
    config: AgentClientConfig,
}

impl HttpAgentClient {
    pub fn new(config: AgentClientConfig) -> Result<Self, StreamError> {
        if config.base_url.trim().is_empty() {
            return Err(StreamError::Config("agent base_url must not be empty".into()));
        }
        if config.model.trim().is_empty() {
            return Err(StreamError::Config("agent model must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build agent client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(AgentClientConfig::from_env()?)
    }

    pub fn config(&self) -> &AgentClientConfig {
        &self.config
    }
}

pub(crate) fn build_request_body(model: &str, messages: &[ChatMessage]) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": true,
    })
}

#[async_trait::async_trait]
impl UpstreamAgent for HttpAgentClient {
    async fn start_stream(&self, messages: Vec<ChatMessage>) -> Result<ByteStream, StreamError> {
        let body = build_request_body(&self.config.model, &messages);
        debug!(url = %self.config.completions_url(), messages = messages.len(), "starting agent stream");

        let mut request = self
            .client
            .post(self.config.completions_url())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("agent request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::upstream(
                status.as_u16(),
                format!("agent request failed: {body}"),
            ));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::transport(format!("agent stream read failed: {e}"))));
        Ok(Box::pin(stream))
    }
}
