use session_store::SessionStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or connection failure. Never retried automatically.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Malformed stream, duplicate invocation, or unexpected HTTP response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The agent reported a failure through an `error` frame.
    #[error("{0}")]
    Backend(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("request was cancelled")]
    Cancelled,

    #[error("invalid endpoint URL: {0}")]
    InvalidBaseUrl(String),

    #[error(transparent)]
    Store(SessionStoreError),
}

impl ClientError {
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<SessionStoreError> for ClientError {
    fn from(error: SessionStoreError) -> Self {
        match error {
            SessionStoreError::NotFound { session_id } => Self::SessionNotFound(session_id),
            other => Self::Store(other),
        }
    }
}
