//! Deterministic mock implementation of the shared `agent_provider` contract.
//!
//! This crate contains no process or transport logic and is intended for local
//! development and contract-level integration testing of the endpoint, client
//! and relay layers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use agent_provider::{
    AgentContext, AgentHandler, AgentMessage, AgentOptions, CancelSignal, HandlerError,
    HandlerProfile, ThreadState,
};
use async_trait::async_trait;
use tracing::debug;

/// Stable handler identifier used for explicit startup selection.
pub const MOCK_HANDLER_ID: &str = "mock";

/// One scripted action performed by [`MockHandler::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockStep {
    Status(String),
    /// Fails the run with a vendor error.
    Fail(String),
    /// Blocks until the invocation is cancelled.
    WaitForCancel,
}

/// One observed invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MockRun {
    pub session_id: Option<String>,
    pub thread_id: String,
    /// True when the run continued a previously recorded vendor thread.
    pub continued: bool,
    pub prompt: String,
    pub options: AgentOptions,
}

#[derive(Debug, Default)]
struct MockHistory {
    runs: Vec<MockRun>,
    aborted: Vec<String>,
    completed: Vec<Option<String>>,
    undone: Vec<Option<String>>,
}

/// Deterministic handler used by tests and local runs.
#[derive(Debug)]
pub struct MockHandler {
    steps: Vec<MockStep>,
    step_delay: Duration,
    teardown_delay: Duration,
    threads: ThreadState,
    next_thread: AtomicU64,
    history: Mutex<MockHistory>,
}

impl MockHandler {
    /// Creates a mock handler running `steps` with no delay between them.
    #[must_use]
    pub fn new(steps: Vec<MockStep>) -> Self {
        Self {
            steps,
            step_delay: Duration::ZERO,
            teardown_delay: Duration::ZERO,
            threads: ThreadState::new(),
            next_thread: AtomicU64::new(1),
            history: Mutex::new(MockHistory::default()),
        }
    }

    /// Convenience constructor emitting one status per entry.
    #[must_use]
    pub fn with_statuses<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            statuses
                .into_iter()
                .map(|status| MockStep::Status(status.into()))
                .collect(),
        )
    }

    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Delays the return of a cancelled run, like a vendor process that is
    /// slow to exit.
    #[must_use]
    pub fn with_teardown_delay(mut self, delay: Duration) -> Self {
        self.teardown_delay = delay;
        self
    }

    /// Returns the handler's session-to-thread map.
    #[must_use]
    pub fn threads(&self) -> &ThreadState {
        &self.threads
    }

    #[must_use]
    pub fn runs(&self) -> Vec<MockRun> {
        self.lock_history().runs.clone()
    }

    #[must_use]
    pub fn aborted_sessions(&self) -> Vec<String> {
        self.lock_history().aborted.clone()
    }

    #[must_use]
    pub fn undone_sessions(&self) -> Vec<Option<String>> {
        self.lock_history().undone.clone()
    }

    fn allocate_thread(&self) -> String {
        format!("mock-thread-{}", self.next_thread.fetch_add(1, Ordering::SeqCst))
    }

    fn lock_history(&self) -> MutexGuard<'_, MockHistory> {
        lock_unpoisoned(&self.history)
    }

    async fn pause(&self, cancel: &CancelSignal) -> Result<(), HandlerError> {
        if self.step_delay.is_zero() {
            return if cancel.is_cancelled() {
                Err(self.tear_down().await)
            } else {
                Ok(())
            };
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(self.tear_down().await),
            _ = tokio::time::sleep(self.step_delay) => Ok(()),
        }
    }

    async fn tear_down(&self) -> HandlerError {
        if !self.teardown_delay.is_zero() {
            tokio::time::sleep(self.teardown_delay).await;
        }
        HandlerError::Cancelled
    }
}

impl Default for MockHandler {
    fn default() -> Self {
        Self::with_statuses(["Using edit tool..."])
    }
}

#[async_trait]
impl AgentHandler for MockHandler {
    fn profile(&self) -> HandlerProfile {
        HandlerProfile {
            handler_id: MOCK_HANDLER_ID.to_string(),
            model_id: Some("mock".to_string()),
        }
    }

    async fn run(
        &self,
        context: AgentContext,
        cancel: CancelSignal,
        emit: &mut (dyn FnMut(AgentMessage) + Send),
    ) -> Result<(), HandlerError> {
        let session_id = context.session_id().map(str::to_string);
        let continued_thread = session_id
            .as_deref()
            .and_then(|session_id| self.threads.thread_for(session_id));
        let continued = continued_thread.is_some();
        let thread_id = continued_thread.unwrap_or_else(|| self.allocate_thread());

        if let Some(session_id) = session_id.as_deref() {
            self.threads.record(session_id, thread_id.clone());
        }

        debug!(
            session_id = session_id.as_deref().unwrap_or("-"),
            thread_id = %thread_id,
            continued,
            "mock run started"
        );

        self.lock_history().runs.push(MockRun {
            session_id: session_id.clone(),
            thread_id,
            continued,
            prompt: context.render_prompt(),
            options: context.options,
        });

        for step in &self.steps {
            self.pause(&cancel).await?;

            match step {
                MockStep::Status(text) => emit(AgentMessage::status(text.clone())),
                MockStep::Fail(message) => return Err(HandlerError::vendor(message.clone())),
                MockStep::WaitForCancel => {
                    cancel.cancelled().await;
                    return Err(self.tear_down().await);
                }
            }
        }

        self.lock_history().completed.push(session_id);
        Ok(())
    }

    async fn abort(&self, session_id: &str) -> Result<(), HandlerError> {
        self.threads.evict(session_id);
        self.lock_history().aborted.push(session_id.to_string());
        Ok(())
    }

    async fn undo(&self) -> Result<(), HandlerError> {
        let mut history = self.lock_history();
        let Some(last) = history.completed.pop() else {
            return Err(HandlerError::vendor("nothing to undo"));
        };
        history.undone.push(last);
        Ok(())
    }

    async fn redo(&self) -> Result<(), HandlerError> {
        let mut history = self.lock_history();
        let Some(last) = history.undone.pop() else {
            return Err(HandlerError::vendor("nothing to redo"));
        };
        history.completed.push(last);
        Ok(())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
