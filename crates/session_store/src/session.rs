use agent_provider::AgentContext;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::SessionStoreError;

/// One requester-side session as persisted across reloads.
///
/// The attach generation lives in the `RaceCoordinator` and is never
/// written to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    pub id: String,
    pub context: AgentContext,
    #[serde(default)]
    pub last_status: String,
    #[serde(default)]
    pub is_streaming: bool,
    pub created_at: String,
}

impl AgentSession {
    /// Creates a streaming session for `context`.
    ///
    /// The context's own session id is kept when present; otherwise a fresh
    /// uuid is allocated and written back into the context so the backend
    /// keys its vendor thread off the same id.
    pub fn new(mut context: AgentContext) -> Result<Self, SessionStoreError> {
        let id = context
            .session_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        context.session_id = Some(id.clone());

        Ok(Self {
            id,
            context,
            last_status: String::new(),
            is_streaming: true,
            created_at: now_rfc3339()?,
        })
    }

    /// Parses `created_at`.
    pub fn created_at(&self) -> Result<OffsetDateTime, SessionStoreError> {
        OffsetDateTime::parse(&self.created_at, &Rfc3339).map_err(|_| {
            SessionStoreError::InvalidTimestamp {
                field: "createdAt",
                value: self.created_at.clone(),
            }
        })
    }
}

/// Current UTC time formatted as RFC3339.
pub fn now_rfc3339() -> Result<String, SessionStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(SessionStoreError::ClockFormat)
}
