use async_trait::async_trait;

use crate::context::{AgentContext, AgentOptions};
use crate::error::HandlerError;
use crate::message::AgentMessage;
use crate::CancelSignal;

/// Immutable metadata describing a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerProfile {
    /// Stable identifier, also used as the relay `agentId`.
    pub handler_id: String,
    pub model_id: Option<String>,
}

/// Interface for one backend kind driving one vendor SDK or process.
///
/// Handlers are stateless apart from their private [`ThreadState`] map.
///
/// [`ThreadState`]: crate::ThreadState
#[async_trait]
pub trait AgentHandler: Send + Sync + 'static {
    /// Returns handler identity metadata.
    fn profile(&self) -> HandlerProfile;

    /// Backend-level default options, the lowest merge layer.
    fn default_options(&self) -> AgentOptions {
        AgentOptions::new()
    }

    /// Executes one invocation and emits messages in vendor order.
    ///
    /// Implementations must observe `cancel` at every suspension point and
    /// stop emitting once it fires. Returning `Err` is equivalent to emitting
    /// a terminal error; the caller frames it.
    async fn run(
        &self,
        context: AgentContext,
        cancel: CancelSignal,
        emit: &mut (dyn FnMut(AgentMessage) + Send),
    ) -> Result<(), HandlerError>;

    /// Best-effort interruption of the session's vendor work.
    ///
    /// Handlers evict the session's vendor thread mapping here.
    async fn abort(&self, _session_id: &str) -> Result<(), HandlerError> {
        Err(HandlerError::unsupported("abort"))
    }

    /// Reverts the most recently completed invocation for this handler.
    async fn undo(&self) -> Result<(), HandlerError> {
        Err(HandlerError::unsupported("undo"))
    }

    /// Re-applies the most recently undone invocation.
    async fn redo(&self) -> Result<(), HandlerError> {
        Err(HandlerError::unsupported("redo"))
    }
}
