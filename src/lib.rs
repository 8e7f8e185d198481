//! Agent bridge: streams coding-agent invocations from a requester to a
//! local or relayed handler.
//!
//! The workspace crates carry the moving parts:
//! - [`agent_provider`]: handler contract, context and frame codec.
//! - [`agent_endpoint`]: local HTTP endpoint hosting one handler.
//! - [`agent_client`]: provider client and resumable session controller.
//! - [`session_store`]: persisted sessions and the resume/abort race fence.
//! - [`relay_hub`]: relay for handlers that are not co-located.
//!
//! This crate wires them together for the `agent-bridge` binary.

pub mod commands;
pub mod config;
pub mod logging;
pub mod providers;

pub use config::EnvConfig;
pub use providers::{handler_for_id, DEFAULT_PROVIDER_ID};
