use serde::{Deserialize, Serialize};

use crate::frame::{Frame, FrameEvent};

/// Handler-emitted message for one invocation. Relayed, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentMessage {
    Status { content: String },
    Error { content: String },
    Done {
        #[serde(default)]
        content: String,
    },
}

impl AgentMessage {
    #[must_use]
    pub fn status(content: impl Into<String>) -> Self {
        Self::Status {
            content: content.into(),
        }
    }

    #[must_use]
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    #[must_use]
    pub fn done() -> Self {
        Self::Done {
            content: String::new(),
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Status { content } | Self::Error { content } | Self::Done { content } => content,
        }
    }

    /// Returns true when this message ends the invocation.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}

impl From<AgentMessage> for Frame {
    fn from(message: AgentMessage) -> Self {
        match message {
            AgentMessage::Status { content } => Frame::new(FrameEvent::Status, Some(content)),
            AgentMessage::Error { content } => Frame::new(FrameEvent::Error, Some(content)),
            AgentMessage::Done { content } if content.is_empty() => {
                Frame::new(FrameEvent::Done, None)
            }
            AgentMessage::Done { content } => Frame::new(FrameEvent::Done, Some(content)),
        }
    }
}
