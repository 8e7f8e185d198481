use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use agent_provider::CancelSignal;

use crate::error::ApiError;

#[derive(Debug)]
struct ActiveEntry {
    claim_id: u64,
    cancel: CancelSignal,
}

/// Sessions with an invocation currently running at this endpoint.
///
/// At most one invocation per session id is admitted.
#[derive(Debug, Default)]
pub struct ActiveInvocations {
    entries: Mutex<HashMap<String, ActiveEntry>>,
    next_claim: AtomicU64,
}

/// Releases the session's slot when dropped.
#[derive(Debug)]
pub(crate) struct ActiveClaim {
    registry: Arc<ActiveInvocations>,
    session_id: String,
    claim_id: u64,
}

impl ActiveInvocations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session_id`, failing if it is already running.
    pub(crate) fn claim(
        self: &Arc<Self>,
        session_id: &str,
        cancel: CancelSignal,
    ) -> Result<ActiveClaim, ApiError> {
        let mut entries = self.lock();
        if entries.contains_key(session_id) {
            return Err(ApiError::SessionBusy(session_id.to_string()));
        }

        let claim_id = self.next_claim.fetch_add(1, Ordering::Relaxed);
        entries.insert(session_id.to_string(), ActiveEntry { claim_id, cancel });

        Ok(ActiveClaim {
            registry: Arc::clone(self),
            session_id: session_id.to_string(),
            claim_id,
        })
    }

    /// Cancels the running invocation for `session_id` and frees its slot,
    /// so a new invocation can be admitted while the old one tears down.
    /// Returns whether one was running.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.lock().remove(session_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_active(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, session_id: &str, claim_id: u64) {
        let mut entries = self.lock();
        if entries
            .get(session_id)
            .is_some_and(|entry| entry.claim_id == claim_id)
        {
            entries.remove(session_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ActiveClaim {
    fn drop(&mut self) {
        self.registry.release(&self.session_id, self.claim_id);
    }
}
