use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// `session_id -> vendor_thread_id` mapping owned by one handler instance.
///
/// A session maps to at most one vendor thread at a time.
#[derive(Debug, Default)]
pub struct ThreadState {
    threads: Mutex<HashMap<String, String>>,
}

impl ThreadState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the vendor thread to continue for `session_id`, if any.
    #[must_use]
    pub fn thread_for(&self, session_id: &str) -> Option<String> {
        self.lock().get(session_id).cloned()
    }

    /// Records the vendor thread reported for `session_id`, returning the
    /// mapping it replaced.
    pub fn record(&self, session_id: &str, thread_id: impl Into<String>) -> Option<String> {
        self.lock().insert(session_id.to_string(), thread_id.into())
    }

    /// Drops the mapping so the next run starts a fresh vendor thread.
    pub fn evict(&self, session_id: &str) -> Option<String> {
        self.lock().remove(session_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.threads.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadState;

    #[test]
    fn record_replaces_previous_thread_for_session() {
        let state = ThreadState::new();

        assert_eq!(state.record("s1", "thread-a"), None);
        assert_eq!(state.record("s1", "thread-b"), Some("thread-a".to_string()));
        assert_eq!(state.thread_for("s1").as_deref(), Some("thread-b"));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn evict_forgets_session_and_is_idempotent() {
        let state = ThreadState::new();
        state.record("s1", "thread-a");

        assert_eq!(state.evict("s1"), Some("thread-a".to_string()));
        assert_eq!(state.evict("s1"), None);
        assert!(state.thread_for("s1").is_none());
        assert!(state.is_empty());
    }
}
