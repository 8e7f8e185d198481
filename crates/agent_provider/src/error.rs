use thiserror::Error;

/// Error reported by an [`AgentHandler`](crate::AgentHandler).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{operation} is not supported by this handler")]
    Unsupported { operation: &'static str },

    #[error("session '{session_id}' already has an active invocation")]
    SessionBusy { session_id: String },

    #[error("failed to start agent process: {0}")]
    Spawn(String),

    #[error("{0}")]
    Vendor(String),

    #[error("invocation was cancelled")]
    Cancelled,
}

impl HandlerError {
    #[must_use]
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    #[must_use]
    pub fn vendor(message: impl Into<String>) -> Self {
        Self::Vendor(message.into())
    }
}
