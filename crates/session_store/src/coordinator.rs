use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

/// Ticket captured when a stream attaches to a session.
///
/// Finalizing effects carry the ticket and only apply while its generation
/// is still the session's current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attach {
    session_id: String,
    generation: u64,
}

impl Attach {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of withdrawing an attach whose stream never opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Withdrawal {
    /// A newer attach exists; nothing changed.
    Stale,
    /// An earlier attach that is still running became current again.
    Reinstated { generation: u64 },
    /// No other attach is running; the session was hidden and the effect ran.
    Finalized,
}

#[derive(Debug, Default)]
struct SessionFence {
    current: u64,
    /// Attaches that have not finalized or withdrawn yet.
    running: BTreeSet<u64>,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    last_generation: u64,
    fences: HashMap<String, SessionFence>,
    visible: HashSet<String>,
}

impl CoordinatorState {
    fn current(&self, session_id: &str) -> Option<u64> {
        self.fences.get(session_id).map(|fence| fence.current)
    }

    fn is_current(&self, ticket: &Attach) -> bool {
        self.current(&ticket.session_id) == Some(ticket.generation)
    }
}

/// Per-session generation fence.
///
/// Every `send` or `resume` attach takes a fresh generation. An old stream's
/// teardown can still run to completion, but its finalizing effects are
/// discarded once a newer attach exists. Generations come from one counter
/// shared by all sessions and are never reused, so a ticket can never match
/// a later attach.
///
/// A session's fence lives until the session is dismissed with no attach
/// still running.
#[derive(Debug, Default)]
pub struct RaceCoordinator {
    state: Mutex<CoordinatorState>,
}

impl RaceCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new attach for `session_id` and makes it visible.
    pub fn attach(&self, session_id: &str) -> Attach {
        let mut state = self.lock();
        state.last_generation += 1;
        let generation = state.last_generation;

        let fence = state.fences.entry(session_id.to_string()).or_default();
        fence.current = generation;
        fence.running.insert(generation);
        state.visible.insert(session_id.to_string());

        debug!(session_id, generation, "session attached");
        Attach {
            session_id: session_id.to_string(),
            generation,
        }
    }

    /// Current generation, `0` before the first attach.
    #[must_use]
    pub fn current_generation(&self, session_id: &str) -> u64 {
        self.lock().current(session_id).unwrap_or(0)
    }

    #[must_use]
    pub fn is_current(&self, ticket: &Attach) -> bool {
        self.lock().is_current(ticket)
    }

    #[must_use]
    pub fn is_visible(&self, session_id: &str) -> bool {
        self.lock().visible.contains(session_id)
    }

    /// Runs `effect` only if `ticket` is current at application time.
    ///
    /// The check and the effect happen under one lock acquisition, so a
    /// concurrent attach cannot slip between them.
    pub fn apply_if_current<T>(&self, ticket: &Attach, effect: impl FnOnce() -> T) -> Option<T> {
        let state = self.lock();
        if !state.is_current(ticket) {
            debug!(
                session_id = %ticket.session_id,
                generation = ticket.generation,
                "discarding stale effect"
            );
            return None;
        }

        let output = effect();
        drop(state);
        Some(output)
    }

    /// Hides the session and runs `effect`, both only if `ticket` is current.
    ///
    /// Returns `true` when the finalization was applied.
    pub fn finalize(&self, ticket: &Attach, effect: impl FnOnce()) -> bool {
        let mut state = self.lock();
        if let Some(fence) = state.fences.get_mut(&ticket.session_id) {
            fence.running.remove(&ticket.generation);
        }
        if !state.is_current(ticket) {
            debug!(
                session_id = %ticket.session_id,
                generation = ticket.generation,
                "discarding stale finalization"
            );
            return false;
        }

        state.visible.remove(&ticket.session_id);
        effect();
        true
    }

    /// Backs out an attach whose stream never opened.
    ///
    /// If an earlier attach for the session is still running it becomes
    /// current again and keeps the session visible. Otherwise this behaves
    /// like [`RaceCoordinator::finalize`].
    pub fn withdraw(&self, ticket: &Attach, effect: impl FnOnce()) -> Withdrawal {
        let mut state = self.lock();
        let Some(fence) = state.fences.get_mut(&ticket.session_id) else {
            return Withdrawal::Stale;
        };
        fence.running.remove(&ticket.generation);
        if fence.current != ticket.generation {
            return Withdrawal::Stale;
        }

        if let Some(&previous) = fence.running.iter().next_back() {
            fence.current = previous;
            debug!(
                session_id = %ticket.session_id,
                generation = previous,
                "earlier attach reinstated"
            );
            return Withdrawal::Reinstated {
                generation: previous,
            };
        }

        state.visible.remove(&ticket.session_id);
        effect();
        Withdrawal::Finalized
    }

    /// Hides the session unconditionally. Used when the requester dismisses
    /// it explicitly.
    pub fn dismiss(&self, session_id: &str) {
        let mut state = self.lock();
        state.visible.remove(session_id);
        if state
            .fences
            .get(session_id)
            .is_some_and(|fence| fence.running.is_empty())
        {
            state.fences.remove(session_id);
        }
    }

    #[must_use]
    pub fn tracked_sessions(&self) -> usize {
        self.lock().fences.len()
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_starts_at_zero_and_increments_per_attach() {
        let coordinator = RaceCoordinator::new();
        assert_eq!(coordinator.current_generation("s1"), 0);

        let first = coordinator.attach("s1");
        let second = coordinator.attach("s1");

        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);
        assert_eq!(coordinator.current_generation("s1"), 2);
        assert_eq!(coordinator.current_generation("other"), 0);
    }

    #[test]
    fn stale_finalization_is_discarded() {
        let coordinator = RaceCoordinator::new();
        let old = coordinator.attach("s1");
        let new = coordinator.attach("s1");
        let mut applied = Vec::new();

        assert!(!coordinator.finalize(&old, || applied.push("old")));
        assert!(coordinator.is_visible("s1"));

        assert!(coordinator.finalize(&new, || applied.push("new")));
        assert!(!coordinator.is_visible("s1"));
        assert_eq!(applied, vec!["new"]);
    }

    #[test]
    fn apply_if_current_returns_effect_output() {
        let coordinator = RaceCoordinator::new();
        let ticket = coordinator.attach("s1");

        assert_eq!(coordinator.apply_if_current(&ticket, || 7), Some(7));
        coordinator.attach("s1");
        assert_eq!(coordinator.apply_if_current(&ticket, || 7), None);
        assert!(!coordinator.is_current(&ticket));
    }

    #[test]
    fn dismiss_hides_without_resetting_generation() {
        let coordinator = RaceCoordinator::new();
        let ticket = coordinator.attach("s1");
        coordinator.dismiss("s1");

        assert!(!coordinator.is_visible("s1"));
        assert!(coordinator.is_current(&ticket));
        assert_eq!(coordinator.attach("s1").generation(), 2);
    }

    #[test]
    fn generations_are_never_shared_across_sessions() {
        let coordinator = RaceCoordinator::new();
        let a = coordinator.attach("a");
        let b = coordinator.attach("b");

        assert_ne!(a.generation(), b.generation());
        assert_eq!(coordinator.current_generation("b"), b.generation());
    }

    #[test]
    fn withdrawn_attach_reinstates_running_predecessor() {
        let coordinator = RaceCoordinator::new();
        let old = coordinator.attach("s1");
        let failed = coordinator.attach("s1");
        let mut effects = 0;

        assert_eq!(
            coordinator.withdraw(&failed, || effects += 1),
            Withdrawal::Reinstated {
                generation: old.generation()
            }
        );
        assert!(coordinator.is_visible("s1"));
        assert!(coordinator.is_current(&old));

        assert!(coordinator.finalize(&old, || effects += 1));
        assert!(!coordinator.is_visible("s1"));
        assert_eq!(effects, 1);
    }

    #[test]
    fn withdrawn_attach_finalizes_when_predecessor_already_ended() {
        let coordinator = RaceCoordinator::new();
        let old = coordinator.attach("s1");
        let failed = coordinator.attach("s1");
        assert!(!coordinator.finalize(&old, || {}));

        let mut finalized = false;
        assert_eq!(
            coordinator.withdraw(&failed, || finalized = true),
            Withdrawal::Finalized
        );
        assert!(finalized);
        assert!(!coordinator.is_visible("s1"));
    }

    #[test]
    fn withdraw_of_superseded_attach_changes_nothing() {
        let coordinator = RaceCoordinator::new();
        let failed = coordinator.attach("s1");
        let newest = coordinator.attach("s1");

        assert_eq!(coordinator.withdraw(&failed, || {}), Withdrawal::Stale);
        assert!(coordinator.is_current(&newest));
        assert!(coordinator.is_visible("s1"));
    }

    #[test]
    fn dismiss_drops_fence_once_nothing_is_running() {
        let coordinator = RaceCoordinator::new();
        let ticket = coordinator.attach("s1");
        assert!(coordinator.finalize(&ticket, || {}));

        coordinator.dismiss("s1");
        assert_eq!(coordinator.tracked_sessions(), 0);
        assert!(!coordinator.is_current(&ticket));
        assert!(coordinator.attach("s1").generation() > ticket.generation());
    }

    #[test]
    fn sessions_are_fenced_independently() {
        let coordinator = RaceCoordinator::new();
        let a = coordinator.attach("a");
        coordinator.attach("b");
        coordinator.attach("b");

        assert!(coordinator.finalize(&a, || {}));
        assert!(coordinator.is_visible("b"));
    }
}
