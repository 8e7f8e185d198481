//! Minimal backend-agnostic contract for invoking a coding agent.
//!
//! This crate defines the request shape (`AgentContext`), the messages a
//! handler produces (`AgentMessage`), the handler interface itself, and the
//! streamed frame codec shared by the local endpoint and the provider client.
//! It intentionally excludes transport, session persistence, and relay
//! routing concerns.

mod context;
mod error;
pub mod frame;
mod handler;
mod message;
mod thread_state;

pub use context::{merge_options, AgentContext, AgentOptions};
pub use error::HandlerError;
pub use frame::{encode_frame, Frame, FrameDecoder, FrameEvent};
pub use handler::{AgentHandler, HandlerProfile};
pub use message::AgentMessage;
pub use thread_state::ThreadState;

/// Cooperative cancellation token passed through every call boundary.
pub type CancelSignal = tokio_util::sync::CancellationToken;
