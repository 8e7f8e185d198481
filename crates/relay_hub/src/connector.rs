//! Handler side of the relay: registers a local [`AgentHandler`] with a
//! remote hub and serves the invocations the hub routes to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use agent_provider::{AgentContext, AgentHandler, AgentMessage, CancelSignal, HandlerError};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::protocol::{HandlerInbound, HandlerOutbound};

pub const ABORTED_MESSAGE: &str = "Aborted";

/// Connects one handler to a relay hub.
pub struct RelayConnector {
    url: String,
    handler: Arc<dyn AgentHandler>,
    running: Arc<RunningInvocations>,
}

#[derive(Default)]
struct RunningInvocations {
    entries: Mutex<HashMap<String, (u64, CancelSignal)>>,
    next_id: AtomicU64,
}

impl RunningInvocations {
    fn insert(&self, session_id: &str, cancel: CancelSignal) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self.lock().insert(session_id.to_string(), (id, cancel)) {
            previous.cancel();
        }
        id
    }

    fn cancel(&self, session_id: &str) -> bool {
        match self.lock().remove(session_id) {
            Some((_, cancel)) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn finish(&self, session_id: &str, id: u64) {
        let mut entries = self.lock();
        if entries.get(session_id).is_some_and(|(current, _)| *current == id) {
            entries.remove(session_id);
        }
    }

    fn cancel_all(&self) {
        for (_, (_, cancel)) in self.lock().drain() {
            cancel.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (u64, CancelSignal)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl RelayConnector {
    /// `url` is the hub's handler socket, e.g. `ws://127.0.0.1:4722/handler`.
    pub fn new(url: impl Into<String>, handler: Arc<dyn AgentHandler>) -> Self {
        Self {
            url: url.into(),
            handler,
            running: Arc::new(RunningInvocations::default()),
        }
    }

    #[must_use]
    pub fn agent_id(&self) -> String {
        self.handler.profile().handler_id
    }

    /// Registers with the hub and serves invocations until `cancel` fires or
    /// the hub closes the connection.
    pub async fn run(&self, cancel: CancelSignal) -> Result<(), RelayError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(RelayError::transport)?;
        let (mut sink, mut stream) = socket.split();
        let agent_id = self.agent_id();
        info!(url = %self.url, agent_id = %agent_id, "connected to relay hub");

        let (outbox, mut outgoing) = mpsc::unbounded_channel::<HandlerInbound>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                let text = serde_json::to_string(&message)?;
                sink.send(Message::Text(text))
                    .await
                    .map_err(RelayError::transport)?;
            }
            let _ = sink.close().await;
            Ok::<(), RelayError>(())
        });

        let _ = outbox.send(HandlerInbound::RegisterHandler {
            agent_id: agent_id.clone(),
        });

        let result = loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<HandlerOutbound>(&text) {
                    Ok(message) => self.dispatch(message, &outbox, &cancel),
                    Err(error) => warn!(error = %error, "ignoring malformed hub message"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("relay hub closed the connection");
                    break Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => break Err(RelayError::transport(error)),
            }
        };

        self.running.cancel_all();
        let _ = outbox.send(HandlerInbound::UnregisterHandler { agent_id });
        drop(outbox);
        match writer.await {
            Ok(Err(error)) => debug!(error = %error, "relay writer stopped"),
            Ok(Ok(())) | Err(_) => {}
        }
        result
    }

    fn dispatch(
        &self,
        message: HandlerOutbound,
        outbox: &UnboundedSender<HandlerInbound>,
        cancel: &CancelSignal,
    ) {
        match message {
            HandlerOutbound::InvokeHandler {
                session_id,
                agent_id,
                context,
            } => {
                let token = cancel.child_token();
                let claim = self.running.insert(&session_id, token.clone());
                let handler = Arc::clone(&self.handler);
                let running = Arc::clone(&self.running);
                let outbox = outbox.clone();
                tokio::spawn(async move {
                    serve_invocation(handler, session_id.clone(), agent_id, context, token, &outbox)
                        .await;
                    running.finish(&session_id, claim);
                });
            }
            HandlerOutbound::AbortHandler { session_id, .. } => {
                let cancelled = self.running.cancel(&session_id);
                debug!(session_id = %session_id, cancelled, "hub requested abort");
                let handler = Arc::clone(&self.handler);
                tokio::spawn(async move {
                    if let Err(error) = handler.abort(&session_id).await {
                        debug!(session_id = %session_id, error = %error, "handler abort failed");
                    }
                });
            }
            HandlerOutbound::UndoHandler { .. } => {
                let handler = Arc::clone(&self.handler);
                tokio::spawn(async move {
                    if let Err(error) = handler.undo().await {
                        warn!(error = %error, "relayed undo failed");
                    }
                });
            }
            HandlerOutbound::RedoHandler { .. } => {
                let handler = Arc::clone(&self.handler);
                tokio::spawn(async move {
                    if let Err(error) = handler.redo().await {
                        warn!(error = %error, "relayed redo failed");
                    }
                });
            }
        }
    }
}

async fn serve_invocation(
    handler: Arc<dyn AgentHandler>,
    session_id: String,
    agent_id: String,
    mut context: AgentContext,
    cancel: CancelSignal,
    outbox: &UnboundedSender<HandlerInbound>,
) {
    if context.session_id().is_none() {
        context.session_id = Some(session_id.clone());
    }

    let mut reported_error = None;
    let outcome = handler
        .run(context, cancel.clone(), &mut |message| match message {
            AgentMessage::Status { content } => {
                let _ = outbox.send(HandlerInbound::AgentStatus {
                    session_id: session_id.clone(),
                    agent_id: agent_id.clone(),
                    content,
                });
            }
            AgentMessage::Error { content } => {
                reported_error.get_or_insert(content);
            }
            AgentMessage::Done { .. } => {}
        })
        .await;

    let terminal = match (outcome, reported_error) {
        (_, Some(content)) => HandlerInbound::AgentError {
            session_id,
            agent_id,
            content,
        },
        (Err(HandlerError::Cancelled), None) => HandlerInbound::AgentError {
            session_id,
            agent_id,
            content: ABORTED_MESSAGE.to_string(),
        },
        (Ok(()), None) if cancel.is_cancelled() => HandlerInbound::AgentError {
            session_id,
            agent_id,
            content: ABORTED_MESSAGE.to_string(),
        },
        (Ok(()), None) => HandlerInbound::AgentDone {
            session_id,
            agent_id,
            content: None,
        },
        (Err(error), None) => HandlerInbound::AgentError {
            session_id,
            agent_id,
            content: error.to_string(),
        },
    };
    let _ = outbox.send(terminal);
}
