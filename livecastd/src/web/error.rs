use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;

use livecast_core::{LaunchError, OverlayError, SourceError, SupervisorError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Overlay(#[from] OverlayError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Stream(#[from] SupervisorError),
    #[error("background task failed: {0}")]
    Join(#[from] JoinError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Source(_) => StatusCode::BAD_REQUEST,
            ApiError::Overlay(OverlayError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Overlay(OverlayError::AlreadyExists { .. } | OverlayError::Invalid(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Overlay(_) | ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Stream(
                SupervisorError::EarlyExit { .. } | SupervisorError::FallbackFailed { .. },
            ) => StatusCode::BAD_GATEWAY,
            ApiError::Stream(SupervisorError::Launch(LaunchError::BinaryNotFound { .. })) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Stream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Overlay(OverlayError::NotFound { .. }) => "Overlay not found".to_string(),
            ApiError::Overlay(OverlayError::AlreadyExists { .. }) => {
                "Overlay with this name already exists".to_string()
            }
            ApiError::Overlay(OverlayError::Invalid(reason)) => reason.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let body = match self {
            ApiError::Stream(_) => json!({"status": "error", "message": message}),
            _ => json!({"error": message}),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_failures_map_to_gateway_and_availability_codes() {
        let early = ApiError::from(SupervisorError::EarlyExit {
            input: "rtsp://cam/live".into(),
            output: "Permission denied".into(),
        });
        assert_eq!(early.status(), StatusCode::BAD_GATEWAY);

        let fallback = ApiError::from(SupervisorError::FallbackFailed {
            output: "lavfi missing".into(),
        });
        assert_eq!(fallback.status(), StatusCode::BAD_GATEWAY);

        let missing = ApiError::from(SupervisorError::Launch(LaunchError::BinaryNotFound {
            program: "ffmpeg".into(),
        }));
        assert_eq!(missing.status(), StatusCode::SERVICE_UNAVAILABLE);

        let stuck = ApiError::from(SupervisorError::StopTimedOut { pid: 7 });
        assert_eq!(stuck.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn overlay_errors_use_client_facing_messages() {
        let missing = ApiError::from(OverlayError::NotFound {
            name: "ticker".into(),
        });
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.message(), "Overlay not found");

        let duplicate = ApiError::from(OverlayError::AlreadyExists {
            name: "ticker".into(),
        });
        assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
        assert_eq!(duplicate.message(), "Overlay with this name already exists");
    }
}
