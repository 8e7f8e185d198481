#![cfg(unix)]

use std::time::Duration;

use agent_provider::{AgentContext, AgentHandler, AgentMessage, CancelSignal, HandlerError};
use agent_provider_codex_cli::{CodexCliConfig, CodexCliHandler};
use assert_matches::assert_matches;

const TURN_SCRIPT: &str = r#"
echo '{"type":"thread.started","thread_id":"thread-42"}'
echo '{"type":"turn.started"}'
echo 'not json at all'
echo '{"type":"item.started","item":{"id":"1","type":"command_execution","command":"ls src"}}'
echo '{"type":"item.completed","item":{"id":"2","type":"file_change","changes":[{"path":"src/App.tsx","kind":"update"}]}}'
echo '{"type":"turn.completed","usage":{}}'
"#;

/// Fails with exit 7 when asked to resume any thread other than `thread-42`.
const RESUME_CHECK_SCRIPT: &str = r#"
case "$*" in
  *resume*)
    case "$*" in
      *"resume thread-42"*) ;;
      *) exit 7 ;;
    esac
    ;;
esac
echo '{"type":"thread.started","thread_id":"thread-42"}'
echo '{"type":"turn.completed"}'
"#;

fn scripted(script: &str) -> CodexCliHandler {
    CodexCliHandler::new(CodexCliConfig::new("sh").with_leading_args(["-c", script, "codex"]))
}

async fn run_collect(
    handler: &CodexCliHandler,
    context: AgentContext,
    cancel: CancelSignal,
) -> (Vec<String>, Result<(), HandlerError>) {
    let mut statuses = Vec::new();
    let outcome = handler
        .run(context, cancel, &mut |message| {
            if let AgentMessage::Status { content } = message {
                statuses.push(content);
            }
        })
        .await;
    (statuses, outcome)
}

#[tokio::test]
async fn translates_jsonl_items_into_statuses_and_records_thread() {
    let handler = scripted(TURN_SCRIPT);
    let context = AgentContext::new(vec!["<div/>".to_string()], "fix").with_session_id("s1");

    let (statuses, outcome) = run_collect(&handler, context, CancelSignal::new()).await;

    assert_eq!(outcome, Ok(()));
    assert_eq!(statuses, vec!["Running ls src", "Edited src/App.tsx"]);
    assert_eq!(handler.threads().thread_for("s1").as_deref(), Some("thread-42"));
}

#[tokio::test]
async fn second_run_for_same_session_resumes_recorded_thread() {
    let handler = scripted(RESUME_CHECK_SCRIPT);
    let context = AgentContext::new(Vec::new(), "go").with_session_id("s1");

    let (_, first) = run_collect(&handler, context.clone(), CancelSignal::new()).await;
    let (_, second) = run_collect(&handler, context, CancelSignal::new()).await;

    assert_eq!(first, Ok(()));
    assert_eq!(second, Ok(()));
}

#[tokio::test]
async fn turn_failed_event_becomes_vendor_error() {
    let handler = scripted(
        r#"echo '{"type":"turn.failed","error":{"message":"quota exceeded"}}'"#,
    );

    let (_, outcome) = run_collect(
        &handler,
        AgentContext::new(Vec::new(), "go"),
        CancelSignal::new(),
    )
    .await;

    assert_eq!(outcome, Err(HandlerError::vendor("quota exceeded")));
}

#[tokio::test]
async fn non_zero_exit_without_turn_result_reports_stderr_tail() {
    let handler = scripted("echo 'missing api key' >&2; exit 3");

    let (_, outcome) = run_collect(
        &handler,
        AgentContext::new(Vec::new(), "go"),
        CancelSignal::new(),
    )
    .await;

    assert_matches!(outcome, Err(HandlerError::Vendor(message)) if message.contains("missing api key"));
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    let handler = CodexCliHandler::new(CodexCliConfig::new("/nonexistent/agent-bridge-codex"));

    let (_, outcome) = run_collect(
        &handler,
        AgentContext::new(Vec::new(), "go"),
        CancelSignal::new(),
    )
    .await;

    assert_matches!(outcome, Err(HandlerError::Spawn(_)));
}

#[tokio::test]
async fn cancellation_kills_the_process() {
    let handler = scripted(
        r#"echo '{"type":"item.started","item":{"id":"1","type":"command_execution","command":"sleep"}}'; exec sleep 30"#,
    );
    let cancel = CancelSignal::new();
    let trigger = cancel.clone();

    let (run, ()) = tokio::join!(
        tokio::time::timeout(
            Duration::from_secs(10),
            run_collect(&handler, AgentContext::new(Vec::new(), "go"), cancel),
        ),
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        }
    );

    let (statuses, outcome) = run.expect("run ends promptly after cancellation");
    assert_eq!(statuses, vec!["Running sleep"]);
    assert_eq!(outcome, Err(HandlerError::Cancelled));
}

#[tokio::test]
async fn abort_cancels_live_run_and_evicts_thread() {
    let handler = scripted(
        r#"echo '{"type":"thread.started","thread_id":"thread-7"}'; exec sleep 30"#,
    );
    let context = AgentContext::new(Vec::new(), "go").with_session_id("s1");

    let (run, abort) = tokio::join!(
        tokio::time::timeout(
            Duration::from_secs(10),
            run_collect(&handler, context, CancelSignal::new()),
        ),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handler.abort("s1").await
        }
    );

    let (_, outcome) = run.expect("run ends promptly after abort");
    assert_eq!(outcome, Err(HandlerError::Cancelled));
    assert_eq!(abort, Ok(()));
    assert_eq!(handler.threads().thread_for("s1"), None);
}

#[tokio::test]
async fn undo_replays_on_last_completed_thread_and_redo_follows() {
    let handler = scripted(RESUME_CHECK_SCRIPT);

    assert_matches!(handler.undo().await, Err(HandlerError::Vendor(_)));

    let context = AgentContext::new(Vec::new(), "go").with_session_id("s1");
    let (_, outcome) = run_collect(&handler, context, CancelSignal::new()).await;
    assert_eq!(outcome, Ok(()));

    assert_eq!(handler.undo().await, Ok(()));
    assert_matches!(handler.undo().await, Err(HandlerError::Vendor(_)));
    assert_eq!(handler.redo().await, Ok(()));
    assert_matches!(handler.redo().await, Err(HandlerError::Vendor(_)));
}
