use std::time::Duration;

use agent_provider::AgentOptions;
use serde_json::Value;

/// Default address of a local agent endpoint.
pub const DEFAULT_ENDPOINT_URL: &str = "http://127.0.0.1:4567";

/// Transport configuration for the provider client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the local agent endpoint.
    pub base_url: String,
    /// Caller-level option defaults. Per-call options win over these.
    pub default_options: AgentOptions,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Timeout for the short control calls (`abort`, `undo`, `health`).
    /// Streams are never subject to it.
    pub control_timeout: Option<Duration>,
    /// Yield `ClientError::Cancelled` once when a stream is cancelled
    /// instead of ending silently.
    pub surface_cancellation: bool,
    /// Summary string surfaced after a stream completes successfully.
    pub completion_message: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ENDPOINT_URL.to_string(),
            default_options: AgentOptions::new(),
            connect_timeout: None,
            control_timeout: Some(Duration::from_secs(10)),
            surface_cancellation: false,
            completion_message: None,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_default_options(mut self, options: AgentOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn with_default_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_options.insert(key.into(), value.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = Some(timeout);
        self
    }

    pub fn with_surface_cancellation(mut self, surface: bool) -> Self {
        self.surface_cancellation = surface;
        self
    }

    pub fn with_completion_message(mut self, message: impl Into<String>) -> Self {
        self.completion_message = Some(message.into());
        self
    }
}
