use agent_provider::HandlerError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A second invocation arrived for a session that is still running.
    #[error("session '{0}' already has an active invocation")]
    SessionBusy(String),

    #[error("{0} is not supported by this handler")]
    Unsupported(&'static str),

    #[error("handler error: {0}")]
    Handler(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::SessionBusy(_) => StatusCode::CONFLICT,
            ApiError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

impl From<HandlerError> for ApiError {
    fn from(error: HandlerError) -> Self {
        match error {
            HandlerError::SessionBusy { session_id } => ApiError::SessionBusy(session_id),
            HandlerError::Unsupported { operation } => ApiError::Unsupported(operation),
            other => ApiError::Handler(other.to_string()),
        }
    }
}
