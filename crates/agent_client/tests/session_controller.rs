mod support;

use std::sync::Arc;
use std::time::Duration;

use agent_client::{ClientConfig, ClientError, ProviderClient, SessionController, RESUMING_STATUS};
use agent_provider::AgentContext;
use assert_matches::assert_matches;
use session_store::SessionStore;
use support::{json, sse, sse_chunks, ScriptedResponse, ScriptedServer, SCENARIO_A_BODY};

fn controller_for(server: &ScriptedServer) -> SessionController {
    let client = ProviderClient::new(ClientConfig::new(&server.base_url)).expect("client");
    SessionController::new(Arc::new(client), Arc::new(SessionStore::in_memory()))
}

fn context() -> AgentContext {
    AgentContext::new(vec!["<button>Click</button>".to_string()], "make it green")
}

#[tokio::test]
async fn scenario_a_ends_with_session_not_streaming() {
    let server = ScriptedServer::new(vec![sse(200, SCENARIO_A_BODY)]).await;
    let controller = controller_for(&server);

    let run = controller.start(context()).await.expect("run starts");
    let session_id = run.session_id().to_string();
    assert!(controller.is_visible(&session_id));

    let statuses = run.drain().await.expect("run succeeds");

    assert_eq!(statuses, vec!["Thinking…", "Using edit tool...", "Completed"]);
    let session = controller
        .session(&session_id)
        .expect("load")
        .expect("session persisted");
    assert!(!session.is_streaming);
    assert_eq!(session.last_status, "Completed");
    assert!(!controller.is_visible(&session_id));
}

#[tokio::test]
async fn backend_error_keeps_last_known_good_status() {
    let server = ScriptedServer::new(vec![sse(
        200,
        "event: status\ndata: Using edit tool...\n\nevent: error\ndata: boom\n\nevent: done\n\n",
    )])
    .await;
    let controller = controller_for(&server);

    let run = controller.start(context()).await.expect("run starts");
    let session_id = run.session_id().to_string();

    assert_matches!(run.drain().await, Err(ClientError::Backend(message)) if message == "boom");
    let session = controller.session(&session_id).expect("load").expect("session");
    assert_eq!(session.last_status, "Using edit tool...");
    assert!(!session.is_streaming);
}

#[tokio::test]
async fn resume_missing_session_is_not_found() {
    let server = ScriptedServer::new(Vec::new()).await;
    let controller = controller_for(&server);

    assert_matches!(
        controller.resume("ghost").await,
        Err(ClientError::SessionNotFound(id)) if id == "ghost"
    );
    assert!(!controller.is_visible("ghost"));
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn old_run_teardown_after_resume_does_not_hide_session() {
    let server = ScriptedServer::new(vec![
        ScriptedResponse::Hang { status: 200 },
        sse_chunks(&[
            (0, "event: status\ndata: Using edit tool...\n\n"),
            (100, "event: status\ndata: Completed\n\nevent: done\n\n"),
        ]),
        json(200, "{}"),
    ])
    .await;
    let controller = controller_for(&server);

    let old_run = controller.start(context()).await.expect("first run starts");
    let session_id = old_run.session_id().to_string();

    let mut resumed = controller.resume(&session_id).await.expect("resume starts");
    assert_eq!(
        resumed.next_status().await.expect("status").expect("ok"),
        RESUMING_STATUS
    );

    drop(old_run);

    assert!(controller.is_visible(&session_id));
    assert!(
        controller
            .session(&session_id)
            .expect("load")
            .expect("session")
            .is_streaming
    );

    let rest = resumed.drain().await.expect("resume succeeds");
    assert_eq!(rest, vec!["Using edit tool...", "Completed"]);
    assert!(!controller.is_visible(&session_id));
    assert!(
        !controller
            .session(&session_id)
            .expect("load")
            .expect("session")
            .is_streaming
    );
}

#[tokio::test]
async fn abort_cancels_live_run_and_calls_endpoint() {
    let server = ScriptedServer::new(vec![
        ScriptedResponse::Hang { status: 200 },
        json(200, "{}"),
    ])
    .await;
    let controller = controller_for(&server);

    let mut run = controller.start(context()).await.expect("run starts");
    let session_id = run.session_id().to_string();

    controller.abort(&session_id).await;

    let next = tokio::time::timeout(Duration::from_secs(5), run.next_status())
        .await
        .expect("run observes cancellation");
    assert!(next.is_none());
    assert!(!controller.is_visible(&session_id));

    let requests = server.requests();
    assert_eq!(requests[1].path, format!("/abort/{session_id}"));
}

#[tokio::test]
async fn starting_a_new_session_prunes_finished_ones() {
    let server = ScriptedServer::new(vec![
        sse(200, SCENARIO_A_BODY),
        sse(200, SCENARIO_A_BODY),
    ])
    .await;
    let controller = controller_for(&server);

    let first = controller.start(context()).await.expect("first run");
    let first_id = first.session_id().to_string();
    first.drain().await.expect("first run succeeds");

    let second = controller.start(context()).await.expect("second run");
    let second_id = second.session_id().to_string();

    assert!(controller.session(&first_id).expect("load").is_none());
    assert!(controller.session(&second_id).expect("load").is_some());
    second.drain().await.expect("second run succeeds");
}

#[tokio::test]
async fn dismiss_removes_session_and_hides_it() {
    let server = ScriptedServer::new(vec![sse(200, SCENARIO_A_BODY)]).await;
    let controller = controller_for(&server);

    let run = controller.start(context()).await.expect("run starts");
    let session_id = run.session_id().to_string();

    assert!(controller.dismiss(&session_id).expect("dismiss"));
    assert!(!controller.is_visible(&session_id));
    assert!(controller.session(&session_id).expect("load").is_none());
    drop(run);
}
