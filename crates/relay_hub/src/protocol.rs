//! Typed JSON messages exchanged over relay connections.
//!
//! Every message is an object with a kebab-case `type` tag and camelCase
//! fields, e.g. `{"type":"agent-status","sessionId":"s1","agentId":"codex",
//! "content":"Thinking…"}`.

use agent_provider::AgentContext;
use serde::{Deserialize, Serialize};

/// Sent by a handler connection to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum HandlerInbound {
    RegisterHandler {
        agent_id: String,
    },
    UnregisterHandler {
        agent_id: String,
    },
    AgentStatus {
        session_id: String,
        agent_id: String,
        content: String,
    },
    AgentDone {
        session_id: String,
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    AgentError {
        session_id: String,
        agent_id: String,
        content: String,
    },
}

/// Sent by the hub to a handler connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum HandlerOutbound {
    InvokeHandler {
        session_id: String,
        agent_id: String,
        context: AgentContext,
    },
    AbortHandler {
        session_id: String,
        agent_id: String,
    },
    UndoHandler {
        agent_id: String,
    },
    RedoHandler {
        agent_id: String,
    },
}

/// Sent by a requester (browser) connection to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientInbound {
    AgentRequest {
        agent_id: String,
        session_id: String,
        context: AgentContext,
    },
    AgentAbort {
        agent_id: String,
        session_id: String,
    },
    AgentUndo {
        agent_id: String,
    },
    AgentRedo {
        agent_id: String,
    },
    Health,
}

/// Sent by the hub to a requester connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientOutbound {
    AgentStatus {
        session_id: String,
        agent_id: String,
        content: String,
    },
    AgentDone {
        session_id: String,
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    AgentError {
        session_id: String,
        agent_id: String,
        content: String,
    },
    /// Currently registered agent ids, broadcast whenever registration changes.
    Handlers {
        handlers: Vec<String>,
    },
    Health {
        status: String,
        handlers: Vec<String>,
    },
}

impl ClientOutbound {
    #[must_use]
    pub fn agent_error(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::AgentError {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            content: content.into(),
        }
    }

    /// Session the message belongs to, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::AgentStatus { session_id, .. }
            | Self::AgentDone { session_id, .. }
            | Self::AgentError { session_id, .. } => Some(session_id),
            Self::Handlers { .. } | Self::Health { .. } => None,
        }
    }
}
