//! Request errors and their HTTP mapping.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chunkyard_assembly::AssemblyError;

/// Errors returned by the upload endpoints.
///
/// Bodies are plain text so clients can surface the message verbatim.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Internal(String),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AssemblyError> for UploadError {
    fn from(e: AssemblyError) -> Self {
        match e {
            AssemblyError::InvalidArgument(msg) => Self::BadRequest(msg),
            AssemblyError::Storage(_) | AssemblyError::Config(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<MultipartError> for UploadError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(e.body_text())
        } else {
            Self::BadRequest(e.body_text())
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "upload request failed");
        } else {
            tracing::debug!(%status, error = %self, "upload request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembly_errors_map_to_status() {
        let invalid: UploadError = AssemblyError::InvalidArgument("bad index".into()).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.to_string(), "bad index");

        let storage: UploadError = AssemblyError::Storage(std::io::Error::other("disk full")).into();
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(storage.to_string().contains("disk full"));
    }

    #[test]
    fn response_carries_message() {
        let response = UploadError::NotFound("no such file".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
