//! Requester-side client for the local agent endpoint.
//!
//! `ProviderClient` opens one HTTP stream per invocation and decodes the
//! framed body into a finite `StatusStream`. `SessionController` layers the
//! session store and the race coordinator on top so stale stream teardown
//! never finalizes a newer attach.

pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod stream;

pub use client::{HealthStatus, ProviderClient, RESUMING_STATUS};
pub use config::{ClientConfig, DEFAULT_ENDPOINT_URL};
pub use error::ClientError;
pub use session::{SessionController, SessionRun};
pub use stream::{StatusStream, StreamOutcome};
