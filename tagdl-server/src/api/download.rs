//! `GET /download`
//!
//! Accepts `url` (required), `title` (optional tag/filename override) and
//! `mode` (`stream` | `handle`, defaults to the configured mode).

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tagdl_common::RequestId;
use tracing::Instrument;

use crate::error::{PipelineError, RequestFailure, REQUEST_ID_HEADER};
use crate::models::{DownloadQuery, MediaRequest};
use crate::services::pipeline::{self, Delivered};
use crate::AppState;

/// Handle-mode response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadHandle {
    pub download_url: String,
}

/// `<public_base_url>/files/<name>`, relative when no base URL is configured
pub fn download_url(public_base_url: Option<&str>, name: &str) -> String {
    let base = public_base_url.unwrap_or("").trim_end_matches('/');
    format!("{}/files/{}", base, name)
}

/// GET /download
pub async fn download(
    State(state): State<AppState>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Result<Response, RequestFailure> {
    let request_id = RequestId::new();
    let span = tracing::info_span!("download", request_id = %request_id);

    async move {
        let result = handle(&state, request_id, query).await;
        if let Err(error) = &result {
            let status = error.status();
            if status.is_server_error() {
                tracing::error!(
                    error_kind = error.kind().as_str(),
                    code = error.code(),
                    status = status.as_u16(),
                    error = %error,
                    "Download failed"
                );
            } else {
                tracing::warn!(
                    error_kind = error.kind().as_str(),
                    code = error.code(),
                    status = status.as_u16(),
                    error = %error,
                    "Download rejected"
                );
            }
        }
        result.map_err(|error| RequestFailure::new(request_id, error))
    }
    .instrument(span)
    .await
}

async fn handle(
    state: &AppState,
    request_id: RequestId,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Result<Response, PipelineError> {
    let Query(query) = query.map_err(|e| PipelineError::InvalidInput(e.body_text()))?;
    let request = MediaRequest::from_query(request_id, &query)?;
    let mode = query.mode.unwrap_or(state.config.delivery.mode);

    tracing::info!(
        media_id = %request.media_id,
        source_url = %request.source_url,
        title_override = request.requested_title.is_some(),
        mode = ?mode,
        "Download requested"
    );

    match pipeline::run(state, request, mode).await? {
        Delivered::Stream(response) => Ok(response),
        Delivered::Handle(name) => {
            let body = DownloadHandle {
                download_url: download_url(state.config.public_base_url.as_deref(), &name),
            };
            Ok((
                StatusCode::OK,
                [(HeaderName::from_static(REQUEST_ID_HEADER), request_id.to_string())],
                Json(body),
            )
                .into_response())
        }
    }
}

/// Build download routes
pub fn download_routes() -> Router<AppState> {
    Router::new().route("/download", get(download))
}
