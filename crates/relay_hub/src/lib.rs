//! Relay between remote requesters and handlers that are not co-located.
//!
//! Handlers connect to `/handler` and register an agent id; requesters
//! connect to `/client` and send `agent-request` messages that the hub
//! routes by agent id and session id without interpreting their payload.

mod actor;
pub mod config;
pub mod connector;
pub mod error;
pub mod hub;
pub mod protocol;
mod server;

pub use actor::{HubEvent, HubHandle};
pub use config::{RelayConfig, DEFAULT_RELAY_HOST, DEFAULT_RELAY_PORT};
pub use connector::RelayConnector;
pub use error::RelayError;
pub use hub::{ConnectionId, Delivery, RelayHub};
pub use protocol::{ClientInbound, ClientOutbound, HandlerInbound, HandlerOutbound};
pub use server::{
    relay_router, serve_relay, CLIENT_SOCKET_PATH, HANDLER_SOCKET_PATH, RELAY_HEALTH_PATH,
};
