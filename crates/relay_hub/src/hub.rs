//! Synchronous routing core of the relay.
//!
//! `RelayHub` never performs I/O. Each event returns the deliveries the
//! caller must push to connections, in order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use agent_provider::AgentContext;
use tracing::{debug, info, warn};

use crate::protocol::{ClientInbound, ClientOutbound, HandlerInbound, HandlerOutbound};

pub const HANDLER_DISCONNECTED: &str = "handler disconnected";
pub const HANDLER_REPLACED: &str = "handler replaced by a newer registration";
pub const HANDLER_UNREGISTERED: &str = "handler unregistered";

/// Identity of one relay connection, handler or requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One message the hub wants written to a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Handler {
        connection: ConnectionId,
        message: HandlerOutbound,
    },
    Client {
        connection: ConnectionId,
        message: ClientOutbound,
    },
}

#[derive(Debug, Clone)]
struct Route {
    client: ConnectionId,
    handler: ConnectionId,
    agent_id: String,
    aborting: bool,
}

/// Registration and routing tables for one relay.
///
/// Holds one live handler connection per agent id (last registration wins)
/// and at most one in-flight route per session id.
#[derive(Debug, Default)]
pub struct RelayHub {
    handlers: BTreeMap<String, ConnectionId>,
    clients: BTreeSet<ConnectionId>,
    routes: HashMap<String, Route>,
}

impl RelayHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered agent ids in sorted order.
    #[must_use]
    pub fn handlers(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    #[must_use]
    pub fn handler_for(&self, agent_id: &str) -> Option<ConnectionId> {
        self.handlers.get(agent_id).copied()
    }

    #[must_use]
    pub fn has_route(&self, session_id: &str) -> bool {
        self.routes.contains_key(session_id)
    }

    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn client_connected(&mut self, connection: ConnectionId) -> Vec<Delivery> {
        self.clients.insert(connection);
        vec![Delivery::Client {
            connection,
            message: ClientOutbound::Handlers {
                handlers: self.handlers(),
            },
        }]
    }

    /// Drops a requester, aborting every invocation it still has in flight.
    pub fn client_disconnected(&mut self, connection: ConnectionId) -> Vec<Delivery> {
        self.clients.remove(&connection);

        let orphaned: Vec<String> = self
            .routes
            .iter()
            .filter(|(_, route)| route.client == connection)
            .map(|(session_id, _)| session_id.clone())
            .collect();

        let mut deliveries = Vec::new();
        for session_id in orphaned {
            if let Some(route) = self.routes.remove(&session_id) {
                debug!(session_id = %session_id, client = %connection, "aborting orphaned route");
                if !route.aborting {
                    deliveries.push(Delivery::Handler {
                        connection: route.handler,
                        message: HandlerOutbound::AbortHandler {
                            session_id,
                            agent_id: route.agent_id,
                        },
                    });
                }
            }
        }
        deliveries
    }

    pub fn client_message(
        &mut self,
        connection: ConnectionId,
        message: ClientInbound,
    ) -> Vec<Delivery> {
        match message {
            ClientInbound::AgentRequest {
                agent_id,
                session_id,
                context,
            } => self.request(connection, agent_id, session_id, context),
            ClientInbound::AgentAbort {
                agent_id,
                session_id,
            } => self.abort(connection, &agent_id, &session_id),
            ClientInbound::AgentUndo { agent_id } => {
                self.forward_control(&agent_id, HandlerOutbound::UndoHandler {
                    agent_id: agent_id.clone(),
                })
            }
            ClientInbound::AgentRedo { agent_id } => {
                self.forward_control(&agent_id, HandlerOutbound::RedoHandler {
                    agent_id: agent_id.clone(),
                })
            }
            ClientInbound::Health => vec![Delivery::Client {
                connection,
                message: ClientOutbound::Health {
                    status: "ok".to_string(),
                    handlers: self.handlers(),
                },
            }],
        }
    }

    pub fn handler_message(
        &mut self,
        connection: ConnectionId,
        message: HandlerInbound,
    ) -> Vec<Delivery> {
        match message {
            HandlerInbound::RegisterHandler { agent_id } => self.register(connection, agent_id),
            HandlerInbound::UnregisterHandler { agent_id } => {
                if self.handlers.get(&agent_id) != Some(&connection) {
                    debug!(agent_id = %agent_id, handler = %connection, "ignoring stale unregister");
                    return Vec::new();
                }
                self.handlers.remove(&agent_id);
                info!(agent_id = %agent_id, handler = %connection, "handler unregistered");
                let mut deliveries =
                    self.fail_routes(|route| route.agent_id == agent_id, HANDLER_UNREGISTERED);
                deliveries.extend(self.broadcast_handlers());
                deliveries
            }
            HandlerInbound::AgentStatus {
                session_id,
                agent_id,
                content,
            } => self.forward_event(connection, &session_id, false, |client| {
                Delivery::Client {
                    connection: client,
                    message: ClientOutbound::AgentStatus {
                        session_id: session_id.clone(),
                        agent_id,
                        content,
                    },
                }
            }),
            HandlerInbound::AgentDone {
                session_id,
                agent_id,
                content,
            } => self.forward_event(connection, &session_id, true, |client| Delivery::Client {
                connection: client,
                message: ClientOutbound::AgentDone {
                    session_id: session_id.clone(),
                    agent_id,
                    content,
                },
            }),
            HandlerInbound::AgentError {
                session_id,
                agent_id,
                content,
            } => self.forward_event(connection, &session_id, true, |client| Delivery::Client {
                connection: client,
                message: ClientOutbound::AgentError {
                    session_id: session_id.clone(),
                    agent_id,
                    content,
                },
            }),
        }
    }

    /// Drops a handler connection, failing every route it was serving.
    pub fn handler_disconnected(&mut self, connection: ConnectionId) -> Vec<Delivery> {
        let before = self.handlers.len();
        self.handlers.retain(|_, handler| *handler != connection);
        let unregistered = before != self.handlers.len();

        let mut deliveries =
            self.fail_routes(|route| route.handler == connection, HANDLER_DISCONNECTED);
        if unregistered {
            info!(handler = %connection, "handler connection dropped");
            deliveries.extend(self.broadcast_handlers());
        }
        deliveries
    }

    fn register(&mut self, connection: ConnectionId, agent_id: String) -> Vec<Delivery> {
        let previous = self.handlers.insert(agent_id.clone(), connection);
        info!(agent_id = %agent_id, handler = %connection, "handler registered");

        let mut deliveries = Vec::new();
        if let Some(previous) = previous.filter(|previous| *previous != connection) {
            warn!(agent_id = %agent_id, previous = %previous, "replacing handler registration");
            deliveries.extend(self.fail_routes(
                |route| route.handler == previous && route.agent_id == agent_id,
                HANDLER_REPLACED,
            ));
        }
        deliveries.extend(self.broadcast_handlers());
        deliveries
    }

    fn request(
        &mut self,
        client: ConnectionId,
        agent_id: String,
        session_id: String,
        mut context: AgentContext,
    ) -> Vec<Delivery> {
        if self.routes.contains_key(&session_id) {
            warn!(session_id = %session_id, "rejecting duplicate invocation");
            return vec![Delivery::Client {
                connection: client,
                message: ClientOutbound::agent_error(
                    &session_id,
                    agent_id,
                    format!("session '{session_id}' already has an active invocation"),
                ),
            }];
        }

        let Some(handler) = self.handler_for(&agent_id) else {
            warn!(session_id = %session_id, agent_id = %agent_id, "no handler registered");
            let content = format!("handler not registered: {agent_id}");
            return vec![Delivery::Client {
                connection: client,
                message: ClientOutbound::agent_error(session_id, agent_id, content),
            }];
        };

        if context.session_id().is_none() {
            context.session_id = Some(session_id.clone());
        }
        self.routes.insert(
            session_id.clone(),
            Route {
                client,
                handler,
                agent_id: agent_id.clone(),
                aborting: false,
            },
        );
        debug!(session_id = %session_id, agent_id = %agent_id, handler = %handler, "routing invocation");

        vec![Delivery::Handler {
            connection: handler,
            message: HandlerOutbound::InvokeHandler {
                session_id,
                agent_id,
                context,
            },
        }]
    }

    /// Forwards one abort per route, and only from the requester that opened
    /// it. Repeated aborts are no-ops; the route stays until the handler
    /// reports its terminal message.
    fn abort(&mut self, connection: ConnectionId, agent_id: &str, session_id: &str) -> Vec<Delivery> {
        let Some(route) = self.routes.get_mut(session_id) else {
            debug!(session_id = %session_id, agent_id = %agent_id, "abort for unknown route");
            return Vec::new();
        };
        if route.client != connection || route.agent_id != agent_id {
            warn!(
                session_id = %session_id,
                agent_id = %agent_id,
                %connection,
                "ignoring abort from a connection that does not own the route"
            );
            return Vec::new();
        }
        if route.aborting {
            return Vec::new();
        }

        route.aborting = true;
        vec![Delivery::Handler {
            connection: route.handler,
            message: HandlerOutbound::AbortHandler {
                session_id: session_id.to_string(),
                agent_id: route.agent_id.clone(),
            },
        }]
    }

    fn forward_control(&self, agent_id: &str, message: HandlerOutbound) -> Vec<Delivery> {
        match self.handler_for(agent_id) {
            Some(connection) => vec![Delivery::Handler {
                connection,
                message,
            }],
            None => {
                debug!(agent_id = %agent_id, "dropping control message for unregistered handler");
                Vec::new()
            }
        }
    }

    fn forward_event(
        &mut self,
        handler: ConnectionId,
        session_id: &str,
        terminal: bool,
        delivery: impl FnOnce(ConnectionId) -> Delivery,
    ) -> Vec<Delivery> {
        let client = match self.routes.get(session_id) {
            Some(route) if route.handler == handler => route.client,
            _ => {
                debug!(session_id = %session_id, handler = %handler, "dropping unrouted handler event");
                return Vec::new();
            }
        };

        if terminal {
            self.routes.remove(session_id);
        }
        if !self.clients.contains(&client) {
            return Vec::new();
        }
        vec![delivery(client)]
    }

    fn fail_routes(
        &mut self,
        matches: impl Fn(&Route) -> bool,
        reason: &str,
    ) -> Vec<Delivery> {
        let failed: Vec<String> = self
            .routes
            .iter()
            .filter(|(_, route)| matches(route))
            .map(|(session_id, _)| session_id.clone())
            .collect();

        let mut deliveries = Vec::new();
        for session_id in failed {
            if let Some(route) = self.routes.remove(&session_id) {
                warn!(session_id = %session_id, reason, "failing in-flight route");
                deliveries.push(Delivery::Client {
                    connection: route.client,
                    message: ClientOutbound::agent_error(session_id, route.agent_id, reason),
                });
            }
        }
        deliveries
    }

    fn broadcast_handlers(&self) -> Vec<Delivery> {
        let handlers = self.handlers();
        self.clients
            .iter()
            .map(|connection| Delivery::Client {
                connection: *connection,
                message: ClientOutbound::Handlers {
                    handlers: handlers.clone(),
                },
            })
            .collect()
    }
}
