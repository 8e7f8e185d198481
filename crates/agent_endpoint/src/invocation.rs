//! Per-invocation state machine.
//!
//! `Received -> Thinking -> Executing -> Finished | Errored`. Thinking emits
//! exactly one initial status. Finished emits a completion status then
//! `done`; Errored emits `error` then `done`. Once the requester has gone
//! away nothing further is framed and the run ends silently.

use std::sync::Arc;

use agent_provider::{AgentContext, AgentHandler, AgentMessage, CancelSignal, Frame, HandlerError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationPhase {
    Received,
    Thinking,
    Executing,
    Finished,
    Errored,
}

impl InvocationPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }
}

struct Invocation {
    phase: InvocationPhase,
    frames: UnboundedSender<Frame>,
    cancel: CancelSignal,
    detached: bool,
    handler_error: Option<String>,
}

impl Invocation {
    fn new(frames: UnboundedSender<Frame>, cancel: CancelSignal) -> Self {
        Self {
            phase: InvocationPhase::Received,
            frames,
            cancel,
            detached: false,
            handler_error: None,
        }
    }

    fn push(&mut self, frame: Frame) {
        if self.detached {
            return;
        }
        if self.frames.send(frame).is_err() {
            debug!("requester disconnected; cancelling invocation");
            self.detached = true;
            self.cancel.cancel();
        }
    }

    fn think(&mut self, status: &str) {
        self.phase = InvocationPhase::Thinking;
        self.push(Frame::status(status));
    }

    fn on_message(&mut self, message: AgentMessage) {
        if self.phase.is_terminal() || self.handler_error.is_some() {
            return;
        }

        match message {
            AgentMessage::Status { content } => {
                self.phase = InvocationPhase::Executing;
                self.push(Frame::status(content));
            }
            AgentMessage::Error { content } => self.handler_error = Some(content),
            AgentMessage::Done { .. } => {}
        }
    }

    fn finish(&mut self, completion_status: &str) {
        self.phase = InvocationPhase::Finished;
        self.push(Frame::status(completion_status));
        self.push(Frame::done());
    }

    fn fail(&mut self, message: String) {
        self.phase = InvocationPhase::Errored;
        self.push(Frame::error(message));
        self.push(Frame::done());
    }
}

/// Drives one handler invocation, framing its messages into `frames`.
///
/// Returns the terminal phase. When the receiving side of `frames` is
/// dropped the token is cancelled and the remaining frames are discarded.
pub async fn run_invocation(
    handler: Arc<dyn AgentHandler>,
    context: AgentContext,
    cancel: CancelSignal,
    frames: UnboundedSender<Frame>,
    config: &EndpointConfig,
) -> InvocationPhase {
    let session_id = context.session_id().unwrap_or("-").to_string();
    let mut invocation = Invocation::new(frames, cancel.clone());

    invocation.think(&config.thinking_status);
    if invocation.detached {
        return InvocationPhase::Errored;
    }

    let outcome = handler
        .run(context, cancel.clone(), &mut |message| {
            invocation.on_message(message)
        })
        .await;

    if invocation.detached {
        debug!(session_id = %session_id, "invocation ended after requester left");
        return InvocationPhase::Errored;
    }

    match (outcome, invocation.handler_error.take()) {
        (Ok(()), None) if !cancel.is_cancelled() => {
            info!(session_id = %session_id, "invocation finished");
            invocation.finish(&config.completion_status);
        }
        (Err(HandlerError::Cancelled), _) | (Ok(()), None) => {
            info!(session_id = %session_id, "invocation aborted");
            invocation.fail(config.aborted_message.clone());
        }
        (_, Some(message)) => {
            warn!(session_id = %session_id, error = %message, "handler reported error");
            invocation.fail(message);
        }
        (Err(error), None) => {
            warn!(session_id = %session_id, error = %error, "invocation failed");
            invocation.fail(error.to_string());
        }
    }

    invocation.phase
}
