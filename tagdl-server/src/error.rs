//! Error types for tagdl-server
//!
//! Pipeline stages report their own error enums; [`PipelineError`] gathers
//! them for the `/download` handler and maps each to an HTTP status and a
//! stable error code. [`ApiError`] covers `/files`. Every failure response
//! carries the request's correlation ID in the body and in the
//! `x-request-id` header.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tagdl_common::RequestId;
use thiserror::Error;

use crate::services::artifact_store::StoreError;
use crate::services::audio_source::SourceError;
use crate::services::cover_fetcher::CoverError;
use crate::services::metadata_resolver::MetadataError;
use crate::services::muxer::MuxError;

/// Correlation header set on every `/download` and `/files` response
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Error classification used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing source reference
    Input,
    /// Metadata could not be resolved
    Resolution,
    /// Upstream providers failed
    Upstream,
    /// Transcode failed
    Processing,
    /// Client went away mid-delivery
    Delivery,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Processing => "processing",
            ErrorKind::Delivery => "delivery",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Failure of one `/download` request
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Metadata unavailable: {0}")]
    MetadataUnavailable(#[from] MetadataError),

    #[error(transparent)]
    Sources(#[from] SourceError),

    #[error("Cover unavailable: {0}")]
    CoverUnavailable(#[from] CoverError),

    #[error(transparent)]
    Mux(#[from] MuxError),

    #[error("Artifact store error: {0}")]
    Store(#[from] StoreError),

    #[error("Temp resource error: {0}")]
    Resource(#[from] std::io::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) => ErrorKind::Input,
            PipelineError::MetadataUnavailable(_) => ErrorKind::Resolution,
            PipelineError::Sources(SourceError::AllSourcesExhausted(_)) => ErrorKind::Upstream,
            PipelineError::CoverUnavailable(CoverError::Resource(_)) => ErrorKind::Internal,
            PipelineError::CoverUnavailable(_) => ErrorKind::Upstream,
            PipelineError::Mux(_) => ErrorKind::Processing,
            PipelineError::Sources(SourceError::Resource(_))
            | PipelineError::Store(_)
            | PipelineError::Resource(_) => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::MetadataUnavailable(MetadataError::NotFound(_)) => StatusCode::NOT_FOUND,
            PipelineError::MetadataUnavailable(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Sources(SourceError::AllSourcesExhausted(_)) => StatusCode::BAD_GATEWAY,
            PipelineError::CoverUnavailable(CoverError::Resource(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PipelineError::CoverUnavailable(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Mux(_)
            | PipelineError::Sources(SourceError::Resource(_))
            | PipelineError::Store(_)
            | PipelineError::Resource(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "INVALID_INPUT",
            PipelineError::MetadataUnavailable(MetadataError::NotFound(_)) => "MEDIA_NOT_FOUND",
            PipelineError::MetadataUnavailable(_) => "METADATA_UNAVAILABLE",
            PipelineError::Sources(SourceError::AllSourcesExhausted(_)) => {
                "ALL_SOURCES_EXHAUSTED"
            }
            PipelineError::CoverUnavailable(CoverError::Resource(_)) => "INTERNAL_ERROR",
            PipelineError::CoverUnavailable(_) => "COVER_UNAVAILABLE",
            PipelineError::Mux(MuxError::TimedOut(_)) => "MUX_TIMED_OUT",
            PipelineError::Mux(_) => "MUX_FAILED",
            PipelineError::Sources(SourceError::Resource(_))
            | PipelineError::Store(_)
            | PipelineError::Resource(_) => "INTERNAL_ERROR",
        }
    }
}

/// A [`PipelineError`] bound to the request it ended
#[derive(Debug)]
pub struct RequestFailure {
    pub request_id: RequestId,
    pub error: PipelineError,
}

impl RequestFailure {
    pub fn new(request_id: RequestId, error: impl Into<PipelineError>) -> Self {
        Self {
            request_id,
            error: error.into(),
        }
    }
}

impl IntoResponse for RequestFailure {
    fn into_response(self) -> Response {
        error_response(
            self.error.status(),
            self.error.code(),
            self.error.to_string(),
            self.request_id,
        )
    }
}

/// Shared failure envelope: `{"error": {code, message, request_id}}` plus the header
fn error_response(status: StatusCode, code: &str, message: String, request_id: RequestId) -> Response {
    let request_id = request_id.to_string();
    let body = Json(json!({
        "error": {
            "code": code,
            "message": message,
            "request_id": request_id,
        }
    }));

    (status, [(REQUEST_ID_HEADER, request_id)], body).into_response()
}

/// API error type for the non-pipeline endpoints
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => ApiError::NotFound(name),
            StoreError::Io(e) => ApiError::Io(e),
        }
    }
}

/// An [`ApiError`] bound to the request it ended
#[derive(Debug)]
pub struct ApiFailure {
    pub request_id: RequestId,
    pub error: ApiError,
}

impl ApiFailure {
    pub fn new(request_id: RequestId, error: impl Into<ApiError>) -> Self {
        Self {
            request_id,
            error: error.into(),
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let message = match &self.error {
            ApiError::NotFound(name) => name.clone(),
            ApiError::Io(err) => err.to_string(),
        };
        error_response(self.error.status(), self.error.code(), message, self.request_id)
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
