//! Codex CLI-backed implementation of the shared `agent_provider` contract.
//!
//! The handler spawns `codex exec --json` once per invocation, translates the
//! JSONL event stream into `AgentMessage` status updates, and maps the
//! requester's session id onto the CLI's own thread id so later invocations
//! for the same session continue that thread via `resume`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};

use agent_provider::{
    AgentContext, AgentHandler, AgentMessage, AgentOptions, CancelSignal, HandlerError,
    HandlerProfile, ThreadState,
};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, info, warn};

mod config;
mod events;

pub use config::{CodexCliConfig, DEFAULT_CODEX_PROGRAM};
pub use events::{parse_event_line, status_for_item, CodexEvent, CodexItem, ItemPhase};

/// Stable handler identifier used by startup selection and relay registration.
pub const CODEX_CLI_HANDLER_ID: &str = "codex";

const UNDO_PROMPT: &str =
    "Revert every change you made in your previous turn. Do not make any other changes.";
const REDO_PROMPT: &str = "Re-apply the changes you reverted in your previous turn.";
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CompletedTurn {
    session_id: Option<String>,
    thread_id: String,
}

#[derive(Debug, Default)]
struct TurnHistory {
    completed: Option<CompletedTurn>,
    undone: Option<CompletedTurn>,
}

/// `AgentHandler` adapter driving the Codex CLI as a child process.
#[derive(Debug)]
pub struct CodexCliHandler {
    config: CodexCliConfig,
    threads: ThreadState,
    active: Mutex<HashMap<String, CancelSignal>>,
    history: Mutex<TurnHistory>,
}

impl CodexCliHandler {
    #[must_use]
    pub fn new(config: CodexCliConfig) -> Self {
        Self {
            config,
            threads: ThreadState::new(),
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(TurnHistory::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CodexCliConfig {
        &self.config
    }

    /// Returns the handler's session-to-thread map.
    #[must_use]
    pub fn threads(&self) -> &ThreadState {
        &self.threads
    }

    /// Builds the argument list for one turn.
    #[must_use]
    pub fn build_args(
        &self,
        prompt: &str,
        thread_id: Option<&str>,
        options: &AgentOptions,
    ) -> Vec<String> {
        let mut args = self.config.leading_args.clone();
        args.extend(
            ["exec", "--json", "--skip-git-repo-check"]
                .into_iter()
                .map(ToString::to_string),
        );

        if let Some(model) = string_option(options, "model") {
            args.push("--model".to_string());
            args.push(model.to_string());
        }

        if let Some(thread_id) = thread_id {
            args.push("resume".to_string());
            args.push(thread_id.to_string());
        }

        args.push(prompt.to_string());
        args
    }

    async fn run_turn(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        thread_id: Option<String>,
        options: &AgentOptions,
        cancel: &CancelSignal,
        emit: &mut (dyn FnMut(AgentMessage) + Send),
    ) -> Result<Option<String>, HandlerError> {
        let mut command = Command::new(&self.config.program);
        command
            .args(self.build_args(prompt, thread_id.as_deref(), options))
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = string_option(options, "cwd") {
            command.current_dir(cwd);
        } else if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|error| {
            HandlerError::Spawn(format!("{}: {error}", self.config.program))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HandlerError::Spawn("agent stdout was not captured".to_string()))?;
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(read_tail(stderr)));

        let mut lines = BufReader::new(stdout).lines();
        let mut reported_thread = thread_id;
        let mut turn_outcome: Option<Result<(), String>> = None;

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(error) = child.start_kill() {
                        debug!(error = %error, "agent process already exited");
                    }
                    let _ = child.wait().await;
                    return Err(HandlerError::Cancelled);
                }
                line = lines.next_line() => line.map_err(|error| {
                    HandlerError::vendor(format!("failed to read agent output: {error}"))
                })?,
            };

            let Some(line) = line else {
                break;
            };

            let Some(event) = parse_event_line(&line) else {
                debug!(line = %line, "skipping non-event agent output");
                continue;
            };

            match event {
                CodexEvent::ThreadStarted { thread_id } => {
                    if let Some(session_id) = session_id {
                        if let Some(previous) = self.threads.record(session_id, thread_id.clone()) {
                            if previous != thread_id {
                                warn!(session_id, previous = %previous, thread_id = %thread_id, "vendor thread replaced");
                            }
                        }
                    }
                    reported_thread = Some(thread_id);
                }
                CodexEvent::Item { phase, item } => {
                    if let Some(status) = status_for_item(phase, &item) {
                        emit(AgentMessage::status(status));
                    }
                }
                CodexEvent::TurnCompleted => turn_outcome = Some(Ok(())),
                CodexEvent::TurnFailed { message } | CodexEvent::Error { message } => {
                    turn_outcome = Some(Err(message));
                }
                CodexEvent::Ignored { event_type } => {
                    debug!(event_type = %event_type, "ignoring agent event");
                }
            }
        }

        let status = child.wait().await.map_err(|error| {
            HandlerError::vendor(format!("failed to wait for agent process: {error}"))
        })?;
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        match turn_outcome {
            Some(Ok(())) => Ok(reported_thread),
            Some(Err(message)) => Err(HandlerError::Vendor(message)),
            None if status.success() => Ok(reported_thread),
            None if stderr_tail.is_empty() => Err(HandlerError::vendor(format!(
                "{} exited with {status}",
                self.config.program
            ))),
            None => Err(HandlerError::vendor(format!(
                "{} exited with {status}: {stderr_tail}",
                self.config.program
            ))),
        }
    }

    async fn replay_turn(&self, turn: &CompletedTurn, prompt: &str) -> Result<(), HandlerError> {
        let mut emit = |message: AgentMessage| {
            debug!(thread_id = %turn.thread_id, status = message.content(), "replay status");
        };

        self.run_turn(
            prompt,
            turn.session_id.as_deref(),
            Some(turn.thread_id.clone()),
            &self.default_options(),
            &CancelSignal::new(),
            &mut emit,
        )
        .await
        .map(|_| ())
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, CancelSignal>> {
        lock_unpoisoned(&self.active)
    }

    fn lock_history(&self) -> MutexGuard<'_, TurnHistory> {
        lock_unpoisoned(&self.history)
    }
}

impl Default for CodexCliHandler {
    fn default() -> Self {
        Self::new(CodexCliConfig::default())
    }
}

#[async_trait]
impl AgentHandler for CodexCliHandler {
    fn profile(&self) -> HandlerProfile {
        HandlerProfile {
            handler_id: CODEX_CLI_HANDLER_ID.to_string(),
            model_id: self.config.model.clone(),
        }
    }

    fn default_options(&self) -> AgentOptions {
        let mut options = AgentOptions::new();
        if let Some(model) = &self.config.model {
            options.insert("model".to_string(), Value::String(model.clone()));
        }
        options
    }

    async fn run(
        &self,
        context: AgentContext,
        cancel: CancelSignal,
        emit: &mut (dyn FnMut(AgentMessage) + Send),
    ) -> Result<(), HandlerError> {
        let session_id = context.session_id().map(str::to_string);
        let run_cancel = cancel.child_token();
        let thread_id = match session_id.as_deref() {
            Some(session_id) => {
                self.lock_active()
                    .insert(session_id.to_string(), run_cancel.clone());
                self.threads.thread_for(session_id)
            }
            None => None,
        };

        info!(
            session_id = session_id.as_deref().unwrap_or("-"),
            resume = thread_id.is_some(),
            "starting codex turn"
        );

        let outcome = self
            .run_turn(
                &context.render_prompt(),
                session_id.as_deref(),
                thread_id,
                &context.options,
                &run_cancel,
                emit,
            )
            .await;

        if let Some(session_id) = session_id.as_deref() {
            self.lock_active().remove(session_id);
        }

        let reported_thread = outcome?;
        if let Some(thread_id) = reported_thread {
            let mut history = self.lock_history();
            history.completed = Some(CompletedTurn {
                session_id,
                thread_id,
            });
            history.undone = None;
        }

        Ok(())
    }

    async fn abort(&self, session_id: &str) -> Result<(), HandlerError> {
        if let Some(cancel) = self.lock_active().remove(session_id) {
            cancel.cancel();
        }
        self.threads.evict(session_id);
        Ok(())
    }

    async fn undo(&self) -> Result<(), HandlerError> {
        let turn = self
            .lock_history()
            .completed
            .clone()
            .ok_or_else(|| HandlerError::vendor("nothing to undo"))?;

        self.replay_turn(&turn, UNDO_PROMPT).await?;

        let mut history = self.lock_history();
        history.completed = None;
        history.undone = Some(turn);
        Ok(())
    }

    async fn redo(&self) -> Result<(), HandlerError> {
        let turn = self
            .lock_history()
            .undone
            .clone()
            .ok_or_else(|| HandlerError::vendor("nothing to redo"))?;

        self.replay_turn(&turn, REDO_PROMPT).await?;

        let mut history = self.lock_history();
        history.undone = None;
        history.completed = Some(turn);
        Ok(())
    }
}

fn string_option<'a>(options: &'a AgentOptions, key: &str) -> Option<&'a str> {
    options
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn read_tail(mut stderr: ChildStderr) -> String {
    let mut buffer = Vec::new();
    if let Err(error) = stderr.read_to_end(&mut buffer).await {
        debug!(error = %error, "failed to read agent stderr");
    }
    let start = buffer.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&buffer[start..]).trim().to_string()
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
