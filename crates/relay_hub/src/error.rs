use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay hub task is not running")]
    HubClosed,

    #[error("relay transport failed: {0}")]
    Transport(#[source] Box<tungstenite::Error>),

    #[error("failed to encode relay message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("relay listener failed: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    #[must_use]
    pub fn transport(error: tungstenite::Error) -> Self {
        Self::Transport(Box::new(error))
    }
}
