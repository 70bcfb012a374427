use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::pipeline::matcher::PassError;
use crate::sources::SourceError;

/// API-facing error taxonomy. Input errors and the reference-face failure
/// are surfaced to the caller; everything else is an opaque 500. Per-item
/// failures never reach this type, they land in `unmatched`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no photo source selected")]
    NoSource,
    #[error("drive link does not contain a /folders/<id> segment")]
    BadFolderLink,
    #[error("a reference image is required")]
    MissingReference,
    #[error("webcam image is not a valid base64 data URL")]
    BadWebcamImage,
    #[error("No face detected in the reference image.")]
    NoFaceDetected,
    #[error("invalid multipart payload: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NoSource
            | ApiError::BadFolderLink
            | ApiError::MissingReference
            | ApiError::BadWebcamImage
            | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(e) => {
                error!("internal error: {e:#}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<SourceError> for ApiError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::BadFolderLink => ApiError::BadFolderLink,
            SourceError::Other(e) => ApiError::Internal(e),
        }
    }
}

impl From<PassError> for ApiError {
    fn from(err: PassError) -> Self {
        match err {
            PassError::NoReferenceFace => ApiError::NoFaceDetected,
            PassError::Source(e) => ApiError::from(e),
        }
    }
}
