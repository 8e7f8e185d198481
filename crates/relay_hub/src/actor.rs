use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::RelayError;
use crate::hub::{ConnectionId, Delivery, RelayHub};
use crate::protocol::{ClientInbound, ClientOutbound, HandlerInbound, HandlerOutbound};

/// Input to the hub task.
#[derive(Debug)]
pub enum HubEvent {
    ClientConnected {
        connection: ConnectionId,
        outbox: UnboundedSender<ClientOutbound>,
    },
    ClientMessage {
        connection: ConnectionId,
        message: ClientInbound,
    },
    ClientDisconnected {
        connection: ConnectionId,
    },
    HandlerConnected {
        connection: ConnectionId,
        outbox: UnboundedSender<HandlerOutbound>,
    },
    HandlerMessage {
        connection: ConnectionId,
        message: HandlerInbound,
    },
    HandlerDisconnected {
        connection: ConnectionId,
    },
    Handlers {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Cloneable entry point to a running hub task.
///
/// The task is the single owner of the [`RelayHub`]; connections only ever
/// talk to it through this handle, so routing never waits on a socket.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: UnboundedSender<HubEvent>,
    next_connection: Arc<AtomicU64>,
}

impl HubHandle {
    /// Spawns the hub task on the current runtime.
    #[must_use]
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_hub(RelayHub::new(), receiver));
        (
            Self {
                events,
                next_connection: Arc::new(AtomicU64::new(1)),
            },
            task,
        )
    }

    #[must_use]
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    pub fn send(&self, event: HubEvent) -> Result<(), RelayError> {
        self.events.send(event).map_err(|_| RelayError::HubClosed)
    }

    /// Agent ids currently registered with the hub.
    pub async fn handlers(&self) -> Result<Vec<String>, RelayError> {
        let (reply, response) = oneshot::channel();
        self.send(HubEvent::Handlers { reply })?;
        response.await.map_err(|_| RelayError::HubClosed)
    }
}

#[derive(Default)]
struct Outboxes {
    clients: HashMap<ConnectionId, UnboundedSender<ClientOutbound>>,
    handlers: HashMap<ConnectionId, UnboundedSender<HandlerOutbound>>,
}

impl Outboxes {
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match delivery {
                Delivery::Client {
                    connection,
                    message,
                } => {
                    if let Some(outbox) = self.clients.get(&connection) {
                        if outbox.send(message).is_err() {
                            debug!(client = %connection, "client outbox closed");
                        }
                    }
                }
                Delivery::Handler {
                    connection,
                    message,
                } => {
                    if let Some(outbox) = self.handlers.get(&connection) {
                        if outbox.send(message).is_err() {
                            debug!(handler = %connection, "handler outbox closed");
                        }
                    }
                }
            }
        }
    }
}

async fn run_hub(mut hub: RelayHub, mut events: UnboundedReceiver<HubEvent>) {
    let mut outboxes = Outboxes::default();

    while let Some(event) = events.recv().await {
        let deliveries = match event {
            HubEvent::ClientConnected { connection, outbox } => {
                outboxes.clients.insert(connection, outbox);
                hub.client_connected(connection)
            }
            HubEvent::ClientMessage {
                connection,
                message,
            } => hub.client_message(connection, message),
            HubEvent::ClientDisconnected { connection } => {
                outboxes.clients.remove(&connection);
                hub.client_disconnected(connection)
            }
            HubEvent::HandlerConnected { connection, outbox } => {
                outboxes.handlers.insert(connection, outbox);
                Vec::new()
            }
            HubEvent::HandlerMessage {
                connection,
                message,
            } => hub.handler_message(connection, message),
            HubEvent::HandlerDisconnected { connection } => {
                outboxes.handlers.remove(&connection);
                hub.handler_disconnected(connection)
            }
            HubEvent::Handlers { reply } => {
                let _ = reply.send(hub.handlers());
                Vec::new()
            }
        };
        outboxes.deliver(deliveries);
    }

    debug!("relay hub task stopped");
}
