use crate::dto::ErrorRes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use catalog_core::{StudyError, StudyErrorKind};

/// Failure of a REST handler.
#[derive(Debug)]
pub enum ApiError {
    Study(StudyError),
    /// The blocking task running the operation panicked or was cancelled.
    Internal(String),
}

impl From<StudyError> for ApiError {
    fn from(err: StudyError) -> Self {
        ApiError::Study(err)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

pub fn status_for(kind: StudyErrorKind) -> StatusCode {
    match kind {
        StudyErrorKind::Validation => StatusCode::BAD_REQUEST,
        StudyErrorKind::NotFound => StatusCode::NOT_FOUND,
        StudyErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        StudyErrorKind::StorageWrite
        | StudyErrorKind::StorageDelete
        | StudyErrorKind::MetadataWrite
        | StudyErrorKind::MetadataDelete
        | StudyErrorKind::Query => StatusCode::BAD_GATEWAY,
        StudyErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Study(err) => {
                let kind = err.kind();
                let status = status_for(kind);
                if status.is_server_error() {
                    tracing::error!("{} error: {}", kind, err);
                }
                (
                    status,
                    ErrorRes {
                        kind: kind.as_str().to_string(),
                        message: err.to_string(),
                    },
                )
            }
            ApiError::Internal(message) => {
                tracing::error!("handler task failed: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorRes {
                        kind: "internal_error".into(),
                        message: "Internal error".into(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
