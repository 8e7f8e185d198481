//! Local HTTP endpoint hosting one `AgentHandler`.
//!
//! `POST /agent` streams framed status messages for one invocation,
//! `POST /abort/{sessionId}` cancels it, `POST /undo` and `POST /redo`
//! forward to the handler, and `GET /health` reports liveness.

mod active;
pub mod config;
pub mod error;
pub mod invocation;
mod routes;

pub use active::ActiveInvocations;
pub use config::{EndpointConfig, DEFAULT_ENDPOINT_HOST, DEFAULT_ENDPOINT_PORT};
pub use error::ApiError;
pub use invocation::{run_invocation, InvocationPhase};
pub use routes::{
    router, serve, EndpointState, ABORT_PATH, AGENT_PATH, HEALTH_PATH, REDO_PATH, UNDO_PATH,
};
