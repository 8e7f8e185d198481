use std::collections::VecDeque;

use agent_provider::{CancelSignal, Frame, FrameDecoder, FrameEvent};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::error::ClientError;

/// How a status stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A `done` frame arrived.
    Done,
    /// An `error` frame or a transport failure ended the stream.
    Failed(String),
    /// The cancellation token fired.
    Cancelled,
    /// The body ended without a terminal frame.
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Streaming,
    Finished,
}

enum Next {
    Cancelled,
    Chunk(Option<Result<Bytes, ClientError>>),
}

/// Finite, non-restartable sequence of status strings decoded from one
/// framed response body.
///
/// Each call to [`StatusStream::next_status`] suspends on the next body read
/// or on cancellation, whichever comes first.
pub struct StatusStream {
    body: Option<BoxStream<'static, Result<Bytes, ClientError>>>,
    decoder: FrameDecoder,
    pending: VecDeque<Frame>,
    prelude: VecDeque<String>,
    cancel: CancelSignal,
    surface_cancellation: bool,
    completion_message: Option<String>,
    state: State,
    outcome: Option<StreamOutcome>,
}

impl std::fmt::Debug for StatusStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStream")
            .field("state", &self.state)
            .field("outcome", &self.outcome)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl StatusStream {
    /// Wraps a raw framed body.
    pub fn from_body<S>(body: S, cancel: CancelSignal) -> Self
    where
        S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
    {
        Self {
            body: Some(body.boxed()),
            decoder: FrameDecoder::default(),
            pending: VecDeque::new(),
            prelude: VecDeque::new(),
            cancel,
            surface_cancellation: false,
            completion_message: None,
            state: State::Streaming,
            outcome: None,
        }
    }

    /// A stream that has already ended with `outcome`.
    #[must_use]
    pub fn finished(outcome: StreamOutcome, cancel: CancelSignal) -> Self {
        let mut stream = Self::from_body(stream::empty(), cancel);
        stream.body = None;
        stream.state = State::Finished;
        stream.outcome = Some(outcome);
        stream
    }

    /// Queues a synthetic status yielded before any backend frame.
    #[must_use]
    pub fn with_prelude(mut self, status: impl Into<String>) -> Self {
        self.prelude.push_back(status.into());
        self
    }

    #[must_use]
    pub fn with_surface_cancellation(mut self, surface: bool) -> Self {
        self.surface_cancellation = surface;
        self
    }

    #[must_use]
    pub fn with_completion_message(mut self, message: Option<String>) -> Self {
        self.completion_message = message;
        self
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&StreamOutcome> {
        self.outcome.as_ref()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Configured summary, available only after a `done` frame.
    #[must_use]
    pub fn completion_message(&self) -> Option<&str> {
        match self.outcome {
            Some(StreamOutcome::Done) => self.completion_message.as_deref(),
            _ => None,
        }
    }

    /// Returns the next status, `Some(Err(_))` once for a failure, or `None`
    /// when the stream has ended.
    pub async fn next_status(&mut self) -> Option<Result<String, ClientError>> {
        loop {
            if let Some(status) = self.prelude.pop_front() {
                return Some(Ok(status));
            }

            if self.state == State::Finished {
                return None;
            }

            if let Some(frame) = self.pending.pop_front() {
                match frame.event {
                    FrameEvent::Done => {
                        self.finish(StreamOutcome::Done);
                        return None;
                    }
                    FrameEvent::Error => {
                        let message = frame.data.unwrap_or_default();
                        self.finish(StreamOutcome::Failed(message.clone()));
                        return Some(Err(ClientError::Backend(message)));
                    }
                    FrameEvent::Status | FrameEvent::Other(_) => match frame.data {
                        Some(data) => return Some(Ok(data)),
                        None => continue,
                    },
                }
            }

            if self.body.is_none() {
                self.finish(StreamOutcome::Eof);
                return None;
            }

            let next = {
                let Some(body) = self.body.as_mut() else {
                    return None;
                };
                let cancel = &self.cancel;

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Next::Cancelled,
                    chunk = body.next() => Next::Chunk(chunk),
                }
            };

            match next {
                Next::Cancelled => {
                    self.finish(StreamOutcome::Cancelled);
                    return self
                        .surface_cancellation
                        .then_some(Err(ClientError::Cancelled));
                }
                Next::Chunk(Some(Ok(chunk))) => {
                    let frames = self.decoder.feed(&chunk);
                    self.pending.extend(frames);
                }
                Next::Chunk(Some(Err(error))) => {
                    self.finish(StreamOutcome::Failed(error.to_string()));
                    return Some(Err(error));
                }
                Next::Chunk(None) => {
                    self.body = None;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }

    /// Adapts the stream to `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, ClientError>> + Send {
        stream::unfold(self, |mut statuses| async move {
            statuses.next_status().await.map(|item| (item, statuses))
        })
    }

    /// Collects every status until the stream ends, failing on the first
    /// error.
    pub async fn collect_statuses(&mut self) -> Result<Vec<String>, ClientError> {
        let mut statuses = Vec::new();
        while let Some(status) = self.next_status().await {
            statuses.push(status?);
        }
        Ok(statuses)
    }

    fn finish(&mut self, outcome: StreamOutcome) {
        debug!(outcome = ?outcome, "status stream finished");
        self.state = State::Finished;
        self.body = None;
        self.pending.clear();
        self.outcome = Some(outcome);
    }
}
