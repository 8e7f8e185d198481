use std::future::Future;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use crate::actor::{HubEvent, HubHandle};
use crate::hub::ConnectionId;
use crate::protocol::{ClientInbound, ClientOutbound, HandlerInbound, HandlerOutbound};

pub const HANDLER_SOCKET_PATH: &str = "/handler";
pub const CLIENT_SOCKET_PATH: &str = "/client";
pub const RELAY_HEALTH_PATH: &str = "/health";

/// Builds the relay router: one WebSocket route per connection side.
pub fn relay_router(hub: HubHandle) -> Router {
    Router::new()
        .route(HANDLER_SOCKET_PATH, get(handler_socket))
        .route(CLIENT_SOCKET_PATH, get(client_socket))
        .route(RELAY_HEALTH_PATH, get(health))
        .with_state(hub)
}

/// Serves the relay on `listener` until `shutdown` resolves.
pub async fn serve_relay<F>(listener: TcpListener, hub: HubHandle, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "relay hub listening");
    }
    axum::serve(listener, relay_router(hub))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handler_socket(ws: WebSocketUpgrade, State(hub): State<HubHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| pump::<HandlerSide>(socket, hub))
}

async fn client_socket(ws: WebSocketUpgrade, State(hub): State<HubHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| pump::<ClientSide>(socket, hub))
}

async fn health(State(hub): State<HubHandle>) -> Json<Value> {
    let handlers = hub.handlers().await.unwrap_or_default();
    Json(json!({ "status": "ok", "handlers": handlers }))
}

/// Maps one side's socket traffic onto hub events.
trait Side: 'static {
    const NAME: &'static str;
    type Inbound: DeserializeOwned + Send;
    type Outbound: Serialize + Send + 'static;

    fn connected(connection: ConnectionId, outbox: UnboundedSender<Self::Outbound>) -> HubEvent;
    fn message(connection: ConnectionId, message: Self::Inbound) -> HubEvent;
    fn disconnected(connection: ConnectionId) -> HubEvent;
}

struct HandlerSide;

impl Side for HandlerSide {
    const NAME: &'static str = "handler";
    type Inbound = HandlerInbound;
    type Outbound = HandlerOutbound;

    fn connected(connection: ConnectionId, outbox: UnboundedSender<HandlerOutbound>) -> HubEvent {
        HubEvent::HandlerConnected { connection, outbox }
    }

    fn message(connection: ConnectionId, message: HandlerInbound) -> HubEvent {
        HubEvent::HandlerMessage {
            connection,
            message,
        }
    }

    fn disconnected(connection: ConnectionId) -> HubEvent {
        HubEvent::HandlerDisconnected { connection }
    }
}

struct ClientSide;

impl Side for ClientSide {
    const NAME: &'static str = "client";
    type Inbound = ClientInbound;
    type Outbound = ClientOutbound;

    fn connected(connection: ConnectionId, outbox: UnboundedSender<ClientOutbound>) -> HubEvent {
        HubEvent::ClientConnected { connection, outbox }
    }

    fn message(connection: ConnectionId, message: ClientInbound) -> HubEvent {
        HubEvent::ClientMessage {
            connection,
            message,
        }
    }

    fn disconnected(connection: ConnectionId) -> HubEvent {
        HubEvent::ClientDisconnected { connection }
    }
}

async fn pump<S: Side>(socket: WebSocket, hub: HubHandle) {
    let connection = hub.next_connection_id();
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut outgoing) = mpsc::unbounded_channel::<S::Outbound>();

    if hub.send(S::connected(connection, outbox)).is_err() {
        return;
    }
    debug!(side = S::NAME, %connection, "relay connection opened");

    let writer = tokio::spawn(async move {
        while let Some(message) = outgoing.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(error) => {
                    warn!(side = S::NAME, %connection, error = %error, "failed to encode relay message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<S::Inbound>(&text) {
                Ok(message) => {
                    if hub.send(S::message(connection, message)).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    warn!(side = S::NAME, %connection, error = %error, "ignoring malformed relay message");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                debug!(side = S::NAME, %connection, error = %error, "relay socket error");
                break;
            }
        }
    }

    let _ = hub.send(S::disconnected(connection));
    writer.abort();
    debug!(side = S::NAME, %connection, "relay connection closed");
}
