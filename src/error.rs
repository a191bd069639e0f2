//! Errors surfaced by the request pipeline. Components return
//! `ServiceError`; only the server turns them into HTTP responses.

use actix_web::http::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The declared content type is not on the allow-list
    #[error("Unsupported file type. Please upload a JPEG or PNG image.")]
    UnsupportedMediaType,

    /// The upload did not decode as a raster image
    #[error("Invalid image file: {0}")]
    InvalidImage(String),

    /// The multipart form had no `file` field
    #[error("Missing form field `file`")]
    MissingFile,

    /// The multipart body could not be read, or was too large
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    /// The inference provider failed, for whatever reason
    #[error("Error communicating with Gemini API: {0}")]
    InferenceFailure(String),

    #[error("Unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::UnsupportedMediaType
            | ServiceError::InvalidImage(_)
            | ServiceError::MalformedUpload(_) => StatusCode::BAD_REQUEST,
            ServiceError::MissingFile => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::InferenceFailure(_) | ServiceError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Did the caller cause this?
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}
