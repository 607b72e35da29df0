use std::time::Duration;

use crate::errors::StreamError;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_MODEL: &str = "test-agent";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for the upstream agent server client.
#[derive(Clone, Debug)]
pub struct AgentClientConfig {
    /// Base URL of the OpenAI-compatible agent server.
    pub base_url: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Model name sent with every request.
    pub model: String,
    /// Upper bound for a whole streamed turn.
    pub timeout: Duration,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl AgentClientConfig {
    /// Builds a config from `AGENT_BASE_URL`, `AGENT_API_KEY`, `AGENT_MODEL`
    /// and `AGENT_TIMEOUT_SECS`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, StreamError> {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();
        if let Some(base_url) = read("AGENT_BASE_URL") {
            config.base_url = base_url;
        }
        config.api_key = read("AGENT_API_KEY");
        if let Some(model) = read("AGENT_MODEL") {
            config.model = model;
        }
        if let Some(raw) = read("AGENT_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                StreamError::Config(format!("AGENT_TIMEOUT_SECS must be a whole number, got {raw:?}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Overrides the base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}
