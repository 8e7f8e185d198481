use agent_provider::{merge_options, AgentContext, AgentOptions, CancelSignal};
use futures_util::StreamExt;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use session_store::SessionStore;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::stream::{StatusStream, StreamOutcome};

/// Synthetic status yielded first by every resumed stream.
pub const RESUMING_STATUS: &str = "Resuming...";

const EVENT_STREAM: &str = "text/event-stream";

/// Decoded `GET /health` body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub provider: Option<String>,
}

/// HTTP client for one local agent endpoint.
#[derive(Debug)]
pub struct ProviderClient {
    http: Client,
    config: ClientConfig,
    base_url: Url,
}

impl ProviderClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let base_url = parse_base_url(&config.base_url)?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            config,
            base_url,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolves an endpoint route against the configured base URL.
    pub fn endpoint_url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidBaseUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Builds the request body for `context`, applying caller-level defaults
    /// beneath the per-call options carried by the context.
    #[must_use]
    pub fn prepare_context(&self, context: &AgentContext) -> AgentContext {
        let mut prepared = context.clone();
        prepared.options = merge_options(
            &AgentOptions::new(),
            &self.config.default_options,
            &context.options,
        );
        prepared
    }

    /// Starts a new invocation.
    pub async fn send(
        &self,
        context: AgentContext,
        cancel: CancelSignal,
    ) -> Result<StatusStream, ClientError> {
        self.open(&context, cancel, None).await
    }

    /// Re-attaches to a persisted session.
    ///
    /// Fails with `SessionNotFound` when `session_id` is absent from `store`.
    /// The returned stream yields [`RESUMING_STATUS`] before any backend
    /// frame.
    pub async fn resume(
        &self,
        session_id: &str,
        cancel: CancelSignal,
        store: &SessionStore,
    ) -> Result<StatusStream, ClientError> {
        let session = store
            .load(session_id)?
            .ok_or_else(|| ClientError::SessionNotFound(session_id.to_string()))?;

        let mut context = session.context;
        context.session_id = Some(session.id);
        self.open(&context, cancel, Some(RESUMING_STATUS)).await
    }

    /// Best-effort abort. Failures are logged and swallowed.
    pub async fn abort(&self, session_id: &str) {
        match self.endpoint_url(&["abort", session_id]) {
            Ok(url) => self.fire_and_forget("abort", self.http.post(url)).await,
            Err(error) => warn!(session_id, error = %error, "abort skipped"),
        }
    }

    /// Best-effort undo of the most recently completed invocation.
    pub async fn undo(&self) {
        match self.endpoint_url(&["undo"]) {
            Ok(url) => self.fire_and_forget("undo", self.http.post(url)).await,
            Err(error) => warn!(error = %error, "undo skipped"),
        }
    }

    /// Best-effort redo of the most recently undone invocation.
    pub async fn redo(&self) {
        match self.endpoint_url(&["redo"]) {
            Ok(url) => self.fire_and_forget("redo", self.http.post(url)).await,
            Err(error) => warn!(error = %error, "redo skipped"),
        }
    }

    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        let request = self.with_control_timeout(self.http.get(self.endpoint_url(&["health"])?));
        let response = request.send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json::<HealthStatus>().await?)
    }

    async fn open(
        &self,
        context: &AgentContext,
        cancel: CancelSignal,
        prelude: Option<&str>,
    ) -> Result<StatusStream, ClientError> {
        let payload = self.prepare_context(context);
        let request = self
            .http
            .post(self.endpoint_url(&["agent"])?)
            .header(ACCEPT, HeaderValue::from_static(EVENT_STREAM))
            .json(&payload);

        info!(
            session_id = payload.session_id().unwrap_or("-"),
            resume = prelude.is_some(),
            "opening agent stream"
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = request.send() => Some(response),
        };

        let Some(response) = response else {
            return if self.config.surface_cancellation {
                Err(ClientError::Cancelled)
            } else {
                Ok(StatusStream::finished(StreamOutcome::Cancelled, cancel))
            };
        };

        let response = ensure_success(response?).await?;
        ensure_event_stream(&response)?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from));
        let mut stream = StatusStream::from_body(body, cancel)
            .with_surface_cancellation(self.config.surface_cancellation)
            .with_completion_message(self.config.completion_message.clone());
        if let Some(prelude) = prelude {
            stream = stream.with_prelude(prelude);
        }
        Ok(stream)
    }

    async fn fire_and_forget(&self, operation: &'static str, request: RequestBuilder) {
        let outcome = match self.with_control_timeout(request).send().await {
            Ok(response) => ensure_success(response).await.map(|_| ()),
            Err(error) => Err(ClientError::from(error)),
        };

        match outcome {
            Ok(()) => debug!(operation, "control request accepted"),
            Err(error) => warn!(operation, error = %error, "control request failed; ignoring"),
        }
    }

    fn with_control_timeout(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.control_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }
}

fn parse_base_url(input: &str) -> Result<Url, ClientError> {
    let url = Url::parse(input.trim())
        .map_err(|error| ClientError::InvalidBaseUrl(format!("{input}: {error}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::InvalidBaseUrl(input.to_string()));
    }
    Ok(url)
}

async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Protocol(error_message(status, &body)))
}

fn ensure_event_stream(response: &Response) -> Result<(), ClientError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with(EVENT_STREAM) {
        Ok(())
    } else {
        Err(ClientError::protocol(format!(
            "expected {EVENT_STREAM} response, got '{content_type}'"
        )))
    }
}

/// Extracts `{"error": "..."}` from an endpoint error body when present.
fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(Value::as_str)
                .map(ToString::to_string)
        })
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    format!("HTTP {}: {detail}", status.as_u16())
}
