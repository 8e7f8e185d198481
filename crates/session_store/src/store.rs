use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::SessionStoreError;
use crate::session::AgentSession;
use crate::storage::{KeyValueStorage, MemoryStorage};

/// Key prefix for persisted session records.
pub const SESSION_KEY_PREFIX: &str = "agent-bridge:session:";
/// Key holding the ordered list of known session ids.
pub const SESSION_INDEX_KEY: &str = "agent-bridge:sessions";

/// `AgentSession` persistence over a pluggable `KeyValueStorage`.
///
/// Read-modify-write updates are serialized per store instance so two
/// streams writing the same session cannot interleave field updates.
pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Loads a session. Missing ids yield `Ok(None)`.
    pub fn load(&self, session_id: &str) -> Result<Option<AgentSession>, SessionStoreError> {
        let key = session_key(session_id);
        let Some(raw) = self.storage.get_item(&key)? else {
            return Ok(None);
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| SessionStoreError::corrupt(key, source))
    }

    /// Loads a session, failing with `NotFound` when absent.
    pub fn require(&self, session_id: &str) -> Result<AgentSession, SessionStoreError> {
        self.load(session_id)?
            .ok_or_else(|| SessionStoreError::not_found(session_id))
    }

    /// Writes `session`, registering its id in the index.
    pub fn save(&self, session: &AgentSession) -> Result<(), SessionStoreError> {
        let _guard = self.lock_writes();
        self.write_session(session)?;

        let mut ids = self.read_index()?;
        if !ids.iter().any(|id| id == &session.id) {
            ids.push(session.id.clone());
            self.write_index(&ids)?;
        }

        Ok(())
    }

    /// Deletes a session. Returns whether it existed.
    pub fn remove(&self, session_id: &str) -> Result<bool, SessionStoreError> {
        let _guard = self.lock_writes();
        let existed = self.storage.get_item(&session_key(session_id))?.is_some();
        self.storage.remove_item(&session_key(session_id))?;

        let mut ids = self.read_index()?;
        let before = ids.len();
        ids.retain(|id| id != session_id);
        if ids.len() != before {
            self.write_index(&ids)?;
        }

        Ok(existed)
    }

    /// Lists stored sessions in creation order.
    ///
    /// Index entries whose record has disappeared are skipped. Records that
    /// fail to parse are logged and skipped.
    pub fn list(&self) -> Result<Vec<AgentSession>, SessionStoreError> {
        let mut sessions = Vec::new();
        for id in self.read_index()? {
            match self.load(&id) {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => debug!(session_id = %id, "index entry without record"),
                Err(error) => warn!(session_id = %id, error = %error, "skipping unreadable session"),
            }
        }
        Ok(sessions)
    }

    /// Applies `change` to a stored session under the store's write lock.
    ///
    /// Returns `Ok(None)` when the session no longer exists.
    pub fn update<T>(
        &self,
        session_id: &str,
        change: impl FnOnce(&mut AgentSession) -> T,
    ) -> Result<Option<T>, SessionStoreError> {
        let _guard = self.lock_writes();
        let Some(mut session) = self.load(session_id)? else {
            return Ok(None);
        };

        let output = change(&mut session);
        self.write_session(&session)?;
        Ok(Some(output))
    }

    /// Records the latest status text. Additive, never finalizes.
    pub fn record_status(&self, session_id: &str, status: &str) -> Result<bool, SessionStoreError> {
        self.update(session_id, |session| {
            session.last_status = status.to_string();
        })
        .map(|updated| updated.is_some())
    }

    pub fn set_streaming(
        &self,
        session_id: &str,
        is_streaming: bool,
    ) -> Result<bool, SessionStoreError> {
        self.update(session_id, |session| {
            session.is_streaming = is_streaming;
        })
        .map(|updated| updated.is_some())
    }

    /// Clears the last status text.
    pub fn clear_status(&self, session_id: &str) -> Result<bool, SessionStoreError> {
        self.record_status(session_id, "")
    }

    /// Removes every finished session other than `keep_id`.
    ///
    /// Sessions still streaming are left alone. Returns the removed ids.
    pub fn prune_finished_except(&self, keep_id: &str) -> Result<Vec<String>, SessionStoreError> {
        let stale: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|session| session.id != keep_id && !session.is_streaming)
            .map(|session| session.id)
            .collect();

        for id in &stale {
            self.remove(id)?;
        }

        Ok(stale)
    }

    fn write_session(&self, session: &AgentSession) -> Result<(), SessionStoreError> {
        let key = session_key(&session.id);
        let encoded = serde_json::to_string(session)
            .map_err(|source| SessionStoreError::serialize(&key, source))?;
        self.storage.set_item(&key, &encoded)
    }

    fn read_index(&self) -> Result<Vec<String>, SessionStoreError> {
        match self.storage.get_item(SESSION_INDEX_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|source| SessionStoreError::corrupt(SESSION_INDEX_KEY, source)),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, ids: &[String]) -> Result<(), SessionStoreError> {
        let encoded = serde_json::to_string(ids)
            .map_err(|source| SessionStoreError::serialize(SESSION_INDEX_KEY, source))?;
        self.storage.set_item(SESSION_INDEX_KEY, &encoded)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn session_key(session_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}
