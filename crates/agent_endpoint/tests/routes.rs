use std::sync::Arc;
use std::time::Duration;

use agent_endpoint::{router, EndpointConfig, EndpointState};
use agent_provider::{AgentHandler, Frame, FrameDecoder, FrameEvent};
use agent_provider_mock::{MockHandler, MockStep};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app_with(handler: Arc<MockHandler>) -> (Router, EndpointState) {
    let state = EndpointState::new(handler, EndpointConfig::default());
    (router(state.clone()), state)
}

fn agent_request(payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/agent")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request build should succeed")
}

fn empty_post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .expect("request build should succeed")
}

async fn body_frames(body: Body) -> Vec<Frame> {
    let bytes = to_bytes(body, 1024 * 1024)
        .await
        .expect("response body should be readable");
    let text = String::from_utf8(bytes.to_vec()).expect("response body must be utf-8");
    FrameDecoder::parse_frames(&text)
}

fn statuses(frames: &[Frame]) -> Vec<String> {
    frames
        .iter()
        .filter(|frame| frame.event == FrameEvent::Status)
        .filter_map(|frame| frame.data.clone())
        .collect()
}

#[tokio::test]
async fn scenario_a_streams_thinking_tool_completed_then_done() {
    let (app, _) = app_with(Arc::new(MockHandler::with_statuses(["Using edit tool..."])));

    let response = app
        .oneshot(agent_request(json!({
            "content": ["<button>Click</button>"],
            "prompt": "make it green"
        })))
        .await
        .expect("app should handle request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().expect("header"),
        "text/event-stream"
    );

    let frames = body_frames(response.into_body()).await;
    assert_eq!(
        statuses(&frames),
        vec!["Thinking…", "Using edit tool...", "Completed"]
    );
    assert_eq!(frames.last().map(|frame| &frame.event), Some(&FrameEvent::Done));
}

#[tokio::test]
async fn scenario_c_second_invocation_for_active_session_is_rejected() {
    let handler = Arc::new(
        MockHandler::with_statuses(["Using edit tool..."]).with_step_delay(Duration::from_millis(100)),
    );
    let (app, state) = app_with(Arc::clone(&handler));
    let payload = json!({"content": [], "prompt": "go", "sessionId": "s1"});

    let first = app
        .clone()
        .oneshot(agent_request(payload.clone()))
        .await
        .expect("first request handled");
    assert_eq!(first.status(), StatusCode::OK);
    assert!(state.active().is_active("s1"));

    let second = app
        .clone()
        .oneshot(agent_request(payload))
        .await
        .expect("second request handled");
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let error: Value = serde_json::from_slice(
        &to_bytes(second.into_body(), 1024 * 1024)
            .await
            .expect("error body"),
    )
    .expect("json error body");
    assert!(error["error"]
        .as_str()
        .expect("error message")
        .contains("s1"));

    let frames = body_frames(first.into_body()).await;
    assert_eq!(
        statuses(&frames),
        vec!["Thinking…", "Using edit tool...", "Completed"]
    );
    assert_eq!(handler.runs().len(), 1);
}

#[tokio::test]
async fn session_is_released_after_invocation_finishes() {
    let handler = Arc::new(MockHandler::default());
    let (app, state) = app_with(Arc::clone(&handler));
    let payload = json!({"content": [], "prompt": "go", "sessionId": "s1"});

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(agent_request(payload.clone()))
            .await
            .expect("request handled");
        assert_eq!(response.status(), StatusCode::OK);
        body_frames(response.into_body()).await;
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!state.active().is_active("s1"));

    let runs = handler.runs();
    assert_eq!(runs.len(), 2);
    assert!(runs[1].continued, "second run continues the vendor thread");
}

#[tokio::test]
async fn abort_mid_run_frames_aborted_error_and_evicts_thread() {
    let handler = Arc::new(MockHandler::new(vec![
        MockStep::Status("Using edit tool...".to_string()),
        MockStep::WaitForCancel,
    ]));
    let (app, state) = app_with(Arc::clone(&handler));

    let response = app
        .clone()
        .oneshot(agent_request(
            json!({"content": [], "prompt": "go", "sessionId": "s1"}),
        ))
        .await
        .expect("request handled");
    let mut body = response.into_body().into_data_stream();

    let mut received = String::new();
    while !received.contains("Using edit tool...") {
        let chunk = body
            .next()
            .await
            .expect("stream open")
            .expect("chunk readable");
        received.push_str(&String::from_utf8_lossy(&chunk));
    }

    let abort = app
        .clone()
        .oneshot(empty_post("/abort/s1"))
        .await
        .expect("abort handled");
    assert_eq!(abort.status(), StatusCode::OK);
    let abort_body: Value = serde_json::from_slice(
        &to_bytes(abort.into_body(), 1024).await.expect("abort body"),
    )
    .expect("json");
    assert_eq!(abort_body, json!({"sessionId": "s1", "cancelled": true}));

    while let Some(chunk) = body.next().await {
        received.push_str(&String::from_utf8_lossy(&chunk.expect("chunk readable")));
    }
    let frames = FrameDecoder::parse_frames(&received);
    let tail: Vec<&Frame> = frames.iter().rev().take(2).collect();
    assert_eq!(tail[1], &Frame::error("Aborted"));
    assert_eq!(tail[0], &Frame::done());

    assert_eq!(handler.threads().thread_for("s1"), None);
    assert_eq!(handler.aborted_sessions(), vec!["s1".to_string()]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!state.active().is_active("s1"));
}

#[tokio::test]
async fn dropped_body_cancels_quiet_invocation_and_frees_session() {
    let handler = Arc::new(MockHandler::new(vec![MockStep::WaitForCancel]));
    let (app, state) = app_with(Arc::clone(&handler));
    let payload = json!({"content": [], "prompt": "go", "sessionId": "s1"});

    let response = app
        .clone()
        .oneshot(agent_request(payload.clone()))
        .await
        .expect("request handled");
    let mut body = response.into_body().into_data_stream();
    let first = body
        .next()
        .await
        .expect("stream open")
        .expect("chunk readable");
    assert!(String::from_utf8_lossy(&first).contains("Thinking…"));
    assert!(state.active().is_active("s1"));

    drop(body);
    tokio::time::timeout(Duration::from_secs(1), async {
        while state.active().is_active("s1") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session released once the requester is gone");

    let again = app
        .oneshot(agent_request(payload))
        .await
        .expect("request handled");
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn abort_frees_session_before_handler_finishes_tearing_down() {
    let handler = Arc::new(
        MockHandler::new(vec![MockStep::WaitForCancel])
            .with_teardown_delay(Duration::from_millis(300)),
    );
    let (app, state) = app_with(Arc::clone(&handler));
    let payload = json!({"content": [], "prompt": "go", "sessionId": "s1"});

    let first = app
        .clone()
        .oneshot(agent_request(payload.clone()))
        .await
        .expect("request handled");
    assert_eq!(first.status(), StatusCode::OK);

    let abort = app
        .clone()
        .oneshot(empty_post("/abort/s1"))
        .await
        .expect("abort handled");
    assert_eq!(abort.status(), StatusCode::OK);
    assert!(!state.active().is_active("s1"));

    let second = app
        .oneshot(agent_request(payload))
        .await
        .expect("request handled");
    assert_eq!(second.status(), StatusCode::OK);
    assert!(state.active().is_active("s1"));

    let frames = body_frames(first.into_body()).await;
    assert_eq!(frames.last(), Some(&Frame::done()));
    assert!(
        state.active().is_active("s1"),
        "old invocation's teardown must not release the newer claim"
    );
}

#[tokio::test]
async fn abort_for_unknown_session_is_still_ok() {
    let (app, _) = app_with(Arc::new(MockHandler::default()));

    let response = app
        .oneshot(empty_post("/abort/nobody"))
        .await
        .expect("abort handled");

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn undo_targets_last_completed_run_and_reports_empty_history() {
    let handler = Arc::new(MockHandler::default());
    let (app, _) = app_with(Arc::clone(&handler));

    let empty = app
        .clone()
        .oneshot(empty_post("/undo"))
        .await
        .expect("undo handled");
    assert_eq!(empty.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app
        .clone()
        .oneshot(agent_request(
            json!({"content": [], "prompt": "go", "sessionId": "s7"}),
        ))
        .await
        .expect("request handled");
    body_frames(response.into_body()).await;

    let undo = app
        .clone()
        .oneshot(empty_post("/undo"))
        .await
        .expect("undo handled");
    assert_eq!(undo.status(), StatusCode::OK);
    assert_eq!(handler.undone_sessions(), vec![Some("s7".to_string())]);

    let redo = app
        .oneshot(empty_post("/redo"))
        .await
        .expect("redo handled");
    assert_eq!(redo.status(), StatusCode::OK);
}

#[tokio::test]
async fn backend_default_options_sit_beneath_request_options() {
    struct Defaults(MockHandler);

    #[async_trait::async_trait]
    impl AgentHandler for Defaults {
        fn profile(&self) -> agent_provider::HandlerProfile {
            self.0.profile()
        }

        fn default_options(&self) -> agent_provider::AgentOptions {
            let mut options = agent_provider::AgentOptions::new();
            options.insert("model".to_string(), json!("backend"));
            options.insert("cwd".to_string(), json!("/repo"));
            options
        }

        async fn run(
            &self,
            context: agent_provider::AgentContext,
            cancel: agent_provider::CancelSignal,
            emit: &mut (dyn FnMut(agent_provider::AgentMessage) + Send),
        ) -> Result<(), agent_provider::HandlerError> {
            self.0.run(context, cancel, emit).await
        }
    }

    let inner = Defaults(MockHandler::default());
    let handler: Arc<Defaults> = Arc::new(inner);
    let state = EndpointState::new(handler.clone(), EndpointConfig::default());
    let app = router(state);

    let response = app
        .oneshot(agent_request(json!({
            "content": [],
            "prompt": "go",
            "options": {"model": "request"}
        })))
        .await
        .expect("request handled");
    body_frames(response.into_body()).await;

    let runs = handler.0.runs();
    assert_eq!(
        Value::Object(runs[0].options.clone()),
        json!({"model": "request", "cwd": "/repo"})
    );
}

#[tokio::test]
async fn health_reports_provider() {
    let (app, _) = app_with(Arc::new(MockHandler::default()));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .expect("request build should succeed"),
        )
        .await
        .expect("health handled");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(
        &to_bytes(response.into_body(), 1024).await.expect("body"),
    )
    .expect("json");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["provider"], "mock");
}

#[tokio::test]
async fn malformed_body_is_rejected_without_running_handler() {
    let handler = Arc::new(MockHandler::default());
    let (app, _) = app_with(Arc::clone(&handler));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/agent")
                .header("content-type", "application/json")
                .body(Body::from("{\"prompt\": 42}"))
                .expect("request build should succeed"),
        )
        .await
        .expect("request handled");

    assert!(response.status().is_client_error());
    assert!(handler.runs().is_empty());
}
