//! Requester-side session persistence and the resume/abort race coordinator.
//!
//! `SessionStore` keeps `AgentSession` records in any `KeyValueStorage`
//! backend so a session survives reloads. `RaceCoordinator` owns the
//! per-session generation counter that fences finalizing effects against
//! stale streams.

mod coordinator;
mod error;
mod session;
mod storage;
mod store;

pub use coordinator::{Attach, RaceCoordinator, Withdrawal};
pub use error::SessionStoreError;
pub use session::{now_rfc3339, AgentSession};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, ScopedStorage};
pub use store::{SessionStore, SESSION_INDEX_KEY, SESSION_KEY_PREFIX};
