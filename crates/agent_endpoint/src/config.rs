use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const DEFAULT_ENDPOINT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_ENDPOINT_PORT: u16 = 4567;

/// Listener address and fixed status texts for the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub host: IpAddr,
    pub port: u16,
    /// First status of every invocation.
    pub thinking_status: String,
    /// Status emitted right before `done` on success.
    pub completion_status: String,
    /// Error text framed when an invocation is aborted.
    pub aborted_message: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ENDPOINT_HOST,
            port: DEFAULT_ENDPOINT_PORT,
            thinking_status: "Thinking…".to_string(),
            completion_status: "Completed".to_string(),
            aborted_message: "Aborted".to_string(),
        }
    }
}

impl EndpointConfig {
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_thinking_status(mut self, status: impl Into<String>) -> Self {
        self.thinking_status = status.into();
        self
    }

    pub fn with_completion_status(mut self, status: impl Into<String>) -> Self {
        self.completion_status = status.into();
        self
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
