//! Error types for the HTTP handlers.
//!
//! [`AppError`] wraps the broadcaster failures a request can hit and
//! converts them into a JSON response via
//! [`IntoResponse`](axum::response::IntoResponse).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use patchcast_core::{PublishError, SubscribeError};

/// Errors that can occur while handling a request.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The new todo list could not be published.
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    /// The subscriber stream could not be opened.
    #[error("subscribe failed: {0}")]
    Subscribe(#[from] SubscribeError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Subscribe(SubscribeError::Sink { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Subscribe(SubscribeError::Encode { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::warn!(error = %self, status = status.as_u16(), "request failed");

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use patchcast_core::SinkError;

    use super::*;

    #[test]
    fn sink_failure_maps_to_service_unavailable() {
        let err = AppError::from(SubscribeError::from(SinkError::Full));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
