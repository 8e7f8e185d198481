//! Session lifecycle glue driven by a UI collaborator.
//!
//! Status text is written to the store as it arrives. Finalization (marking
//! the session not streaming and hiding it) goes through the race
//! coordinator, so only the latest attach for a session can finalize it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use agent_provider::{AgentContext, CancelSignal};
use session_store::{AgentSession, Attach, RaceCoordinator, SessionStore, Withdrawal};
use tracing::{debug, warn};

use crate::client::ProviderClient;
use crate::error::ClientError;
use crate::stream::{StatusStream, StreamOutcome};

#[derive(Debug, Clone)]
struct LiveAttach {
    ticket: Attach,
    cancel: CancelSignal,
}

type LiveAttaches = Arc<Mutex<HashMap<String, LiveAttach>>>;

/// Owns the store, the coordinator, and the live cancellation tokens for
/// one requester.
#[derive(Debug)]
pub struct SessionController {
    client: Arc<ProviderClient>,
    store: Arc<SessionStore>,
    coordinator: Arc<RaceCoordinator>,
    live: LiveAttaches,
}

impl SessionController {
    #[must_use]
    pub fn new(client: Arc<ProviderClient>, store: Arc<SessionStore>) -> Self {
        Self {
            client,
            store,
            coordinator: Arc::new(RaceCoordinator::new()),
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<RaceCoordinator> {
        &self.coordinator
    }

    #[must_use]
    pub fn is_visible(&self, session_id: &str) -> bool {
        self.coordinator.is_visible(session_id)
    }

    pub fn session(&self, session_id: &str) -> Result<Option<AgentSession>, ClientError> {
        Ok(self.store.load(session_id)?)
    }

    /// Creates, persists, and streams a new session.
    ///
    /// Finished sessions with other ids are pruned: a new session supersedes
    /// them.
    pub async fn start(&self, context: AgentContext) -> Result<SessionRun, ClientError> {
        let session = AgentSession::new(context)?;
        self.store.save(&session)?;
        let pruned = self.store.prune_finished_except(&session.id)?;
        if !pruned.is_empty() {
            debug!(count = pruned.len(), "pruned superseded sessions");
        }

        let (attached, previous) = self.attach(&session.id);
        let opened = self
            .client
            .send(session.context.clone(), attached.cancel.clone())
            .await;
        self.run_from(opened, attached, previous)
    }

    /// Re-attaches to a stored session.
    ///
    /// Any earlier stream for the same id may still be tearing down; its
    /// finalization is fenced out by the new attach.
    pub async fn resume(&self, session_id: &str) -> Result<SessionRun, ClientError> {
        if self.store.load(session_id)?.is_none() {
            return Err(ClientError::SessionNotFound(session_id.to_string()));
        }

        let (attached, previous) = self.attach(session_id);
        if let Err(error) = self.store.set_streaming(session_id, true) {
            warn!(session_id, error = %error, "failed to mark session streaming");
        }

        let opened = self
            .client
            .resume(session_id, attached.cancel.clone(), &self.store)
            .await;
        self.run_from(opened, attached, previous)
    }

    /// Cancels the live stream for `session_id` and asks the endpoint to
    /// stop. Best-effort.
    pub async fn abort(&self, session_id: &str) {
        let live = lock_unpoisoned(&self.live).get(session_id).cloned();
        if let Some(live) = live {
            live.cancel.cancel();
        }
        self.client.abort(session_id).await;
    }

    /// Destroys a session explicitly.
    pub fn dismiss(&self, session_id: &str) -> Result<bool, ClientError> {
        if let Some(live) = lock_unpoisoned(&self.live).remove(session_id) {
            live.cancel.cancel();
        }
        self.coordinator.dismiss(session_id);
        Ok(self.store.remove(session_id)?)
    }

    /// Registers a new attach, returning it with the live attach it replaced.
    fn attach(&self, session_id: &str) -> (LiveAttach, Option<LiveAttach>) {
        let attached = LiveAttach {
            ticket: self.coordinator.attach(session_id),
            cancel: CancelSignal::new(),
        };
        let previous =
            lock_unpoisoned(&self.live).insert(session_id.to_string(), attached.clone());
        (attached, previous)
    }

    fn run_from(
        &self,
        opened: Result<StatusStream, ClientError>,
        attached: LiveAttach,
        previous: Option<LiveAttach>,
    ) -> Result<SessionRun, ClientError> {
        let mut run = SessionRun {
            stream: StatusStream::finished(StreamOutcome::Eof, attached.cancel),
            ticket: attached.ticket,
            store: Arc::clone(&self.store),
            coordinator: Arc::clone(&self.coordinator),
            live: Arc::clone(&self.live),
            finished: false,
        };

        match opened {
            Ok(stream) => {
                run.stream = stream;
                Ok(run)
            }
            Err(error) => {
                run.withdraw(previous);
                Err(error)
            }
        }
    }
}

/// One attached stream for a session.
///
/// Dropping a run before it ends counts as its teardown and applies the same
/// fenced finalization.
#[derive(Debug)]
pub struct SessionRun {
    stream: StatusStream,
    ticket: Attach,
    store: Arc<SessionStore>,
    coordinator: Arc<RaceCoordinator>,
    live: LiveAttaches,
    finished: bool,
}

impl SessionRun {
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.ticket.session_id()
    }

    #[must_use]
    pub fn ticket(&self) -> &Attach {
        &self.ticket
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&StreamOutcome> {
        self.stream.outcome()
    }

    #[must_use]
    pub fn completion_message(&self) -> Option<&str> {
        self.stream.completion_message()
    }

    /// Next status, recording it in the store.
    ///
    /// Failures end the run without touching the stored last status.
    pub async fn next_status(&mut self) -> Option<Result<String, ClientError>> {
        if self.finished {
            return None;
        }

        match self.stream.next_status().await {
            Some(Ok(status)) => {
                if let Err(error) = self.store.record_status(self.session_id(), &status) {
                    warn!(session_id = %self.session_id(), error = %error, "failed to record status");
                }
                Some(Ok(status))
            }
            Some(Err(error)) => {
                self.finalize();
                Some(Err(error))
            }
            None => {
                self.finalize();
                None
            }
        }
    }

    /// Drives the run to completion, returning every status.
    pub async fn drain(mut self) -> Result<Vec<String>, ClientError> {
        let mut statuses = Vec::new();
        while let Some(status) = self.next_status().await {
            statuses.push(status?);
        }
        Ok(statuses)
    }

    fn finalize(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let store = &self.store;
        let session_id = self.ticket.session_id();
        let applied = self.coordinator.finalize(&self.ticket, || {
            if let Err(error) = store.set_streaming(session_id, false) {
                warn!(session_id, error = %error, "failed to mark session finished");
            }
        });

        let mut live = lock_unpoisoned(&self.live);
        if live
            .get(session_id)
            .is_some_and(|entry| entry.ticket == self.ticket)
        {
            live.remove(session_id);
        }
        drop(live);

        debug!(
            session_id,
            generation = self.ticket.generation(),
            applied,
            "session run finalized"
        );
    }
}

impl SessionRun {
    /// Backs out an attach whose stream never opened. A still-running
    /// earlier attach becomes the session's live stream again.
    fn withdraw(&mut self, previous: Option<LiveAttach>) {
        self.finished = true;

        let store = &self.store;
        let session_id = self.ticket.session_id();
        let outcome = self.coordinator.withdraw(&self.ticket, || {
            if let Err(error) = store.set_streaming(session_id, false) {
                warn!(session_id, error = %error, "failed to mark session finished");
            }
        });

        let mut live = lock_unpoisoned(&self.live);
        if live
            .get(session_id)
            .is_some_and(|entry| entry.ticket == self.ticket)
        {
            match previous {
                Some(previous)
                    if outcome
                        == (Withdrawal::Reinstated {
                            generation: previous.ticket.generation(),
                        }) =>
                {
                    live.insert(session_id.to_string(), previous);
                }
                _ => {
                    live.remove(session_id);
                }
            }
        }
        drop(live);

        debug!(
            session_id,
            generation = self.ticket.generation(),
            ?outcome,
            "session attach withdrawn"
        );
    }
}

impl Drop for SessionRun {
    fn drop(&mut self) {
        self.finalize();
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
