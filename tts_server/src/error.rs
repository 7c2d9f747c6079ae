use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::SynthesisError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("TTS error: {0}")]
    TtsError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<SynthesisError> for ApiError {
    fn from(e: SynthesisError) -> Self {
        if e.is_client_error() {
            ApiError::InvalidInput(e.to_string())
        } else {
            ApiError::TtsError(e.to_string())
        }
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::TtsError(msg) => {
                tracing::error!("TTS error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Failures of session-level operations, reported back on the same channel.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {0} already exists")]
    AlreadyExists(String),

    #[error("Session {0} not found")]
    NotFound(String),

    #[error("Voice not found. Available voices: {available:?}")]
    UnknownVoice { voice: String, available: Vec<String> },

    #[error("{0}")]
    InvalidText(#[from] tts_core::TextError),

    #[error("Queue full: {pending} pending batches (capacity {capacity})")]
    QueueFull { pending: usize, capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_invalid_input_is_bad_request() {
        let response = ApiError::InvalidInput("No text provided".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "No text provided");
        assert_eq!(json["code"], 400);
    }

    #[test]
    fn test_synthesis_errors_map_by_kind() {
        let unknown = SynthesisError::UnknownVoice {
            voice: "zz".into(),
            available: vec!["af".into()],
        };
        assert!(matches!(ApiError::from(unknown), ApiError::InvalidInput(_)));

        let failed = SynthesisError::Failed(anyhow::anyhow!("boom"));
        assert!(matches!(ApiError::from(failed), ApiError::TtsError(_)));

        let timeout = SynthesisError::Timeout(240);
        assert!(matches!(ApiError::from(timeout), ApiError::TtsError(_)));
    }
}
