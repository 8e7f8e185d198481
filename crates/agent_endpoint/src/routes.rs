use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use agent_provider::{
    encode_frame, merge_options, AgentContext, AgentHandler, AgentOptions, CancelSignal, Frame,
};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::active::ActiveInvocations;
use crate::config::EndpointConfig;
use crate::error::ApiError;
use crate::invocation::run_invocation;

pub const AGENT_PATH: &str = "/agent";
pub const ABORT_PATH: &str = "/abort/:session_id";
pub const UNDO_PATH: &str = "/undo";
pub const REDO_PATH: &str = "/redo";
pub const HEALTH_PATH: &str = "/health";

/// Shared state for every route.
#[derive(Clone)]
pub struct EndpointState {
    handler: Arc<dyn AgentHandler>,
    active: Arc<ActiveInvocations>,
    config: Arc<EndpointConfig>,
}

impl EndpointState {
    pub fn new(handler: Arc<dyn AgentHandler>, config: EndpointConfig) -> Self {
        Self {
            handler,
            active: Arc::new(ActiveInvocations::new()),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn AgentHandler> {
        &self.handler
    }

    #[must_use]
    pub fn active(&self) -> &Arc<ActiveInvocations> {
        &self.active
    }

    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }
}

/// Builds the endpoint router.
pub fn router(state: EndpointState) -> Router {
    Router::new()
        .route(AGENT_PATH, post(start_agent))
        .route(ABORT_PATH, post(abort_agent))
        .route(UNDO_PATH, post(undo_agent))
        .route(REDO_PATH, post(redo_agent))
        .route(HEALTH_PATH, get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: EndpointState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, provider = %state.handler.profile().handler_id, "agent endpoint listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn start_agent(
    State(state): State<EndpointState>,
    Json(mut context): Json<AgentContext>,
) -> Result<Response, ApiError> {
    context.options = merge_options(
        &state.handler.default_options(),
        &AgentOptions::new(),
        &context.options,
    );

    let cancel = CancelSignal::new();
    let claim = match context.session_id() {
        Some(session_id) => Some(state.active.claim(session_id, cancel.clone())?),
        None => None,
    };

    let (frames, receiver) = mpsc::unbounded_channel();
    let handler = Arc::clone(&state.handler);
    let config = Arc::clone(&state.config);
    tokio::spawn(async move {
        let mut claim = claim;
        let run = run_invocation(handler, context, cancel.clone(), frames.clone(), &config);
        tokio::pin!(run);

        let requester_left = tokio::select! {
            _ = &mut run => false,
            () = frames.closed() => true,
        };
        if requester_left {
            debug!("requester disconnected; cancelling invocation");
            cancel.cancel();
            drop(claim.take());
            run.await;
        }

        // Release the session before the body observes end of stream.
        drop(claim);
        drop(frames);
    });

    let body = Body::from_stream(frame_body(receiver));
    Ok((
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        body,
    )
        .into_response())
}

fn frame_body(
    receiver: UnboundedReceiver<Frame>,
) -> impl futures_util::Stream<Item = Result<String, Infallible>> + Send + 'static {
    stream::unfold(receiver, |mut receiver| async move {
        let frame = receiver.recv().await?;
        Some((Ok(encode_frame(&frame)), receiver))
    })
}

async fn abort_agent(
    State(state): State<EndpointState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    let cancelled = state.active.cancel(&session_id);
    if let Err(error) = state.handler.abort(&session_id).await {
        warn!(session_id = %session_id, error = %error, "handler abort failed");
    }

    info!(session_id = %session_id, cancelled, "abort requested");
    Json(json!({ "sessionId": session_id, "cancelled": cancelled }))
}

async fn undo_agent(State(state): State<EndpointState>) -> Result<Json<Value>, ApiError> {
    state.handler.undo().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn redo_agent(State(state): State<EndpointState>) -> Result<Json<Value>, ApiError> {
    state.handler.redo().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn health(State(state): State<EndpointState>) -> Json<Value> {
    let profile = state.handler.profile();
    Json(json!({
        "status": "ok",
        "provider": profile.handler_id,
        "model": profile.model_id,
    }))
}
