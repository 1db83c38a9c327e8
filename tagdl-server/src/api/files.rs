//! `GET /files/:name` - one-shot retrieval of handle-mode artifacts

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use tagdl_common::RequestId;
use tokio_util::io::ReaderStream;
use tracing::Instrument;

use crate::error::{ApiFailure, ApiResult, REQUEST_ID_HEADER};
use crate::services::artifact_store::artifact_stem;
use crate::services::delivery::content_disposition;
use crate::AppState;

/// GET /files/:name
pub async fn fetch_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiFailure> {
    let request_id = RequestId::new();
    let span = tracing::info_span!("fetch_artifact", request_id = %request_id, artifact = %name);

    async move {
        serve(state, request_id, name).await.map_err(|error| {
            if error.status().is_server_error() {
                tracing::error!(code = error.code(), error = %error, "Artifact retrieval failed");
            } else {
                tracing::warn!(code = error.code(), error = %error, "Artifact retrieval rejected");
            }
            ApiFailure::new(request_id, error)
        })
    }
    .instrument(span)
    .await
}

async fn serve(state: AppState, request_id: RequestId, name: String) -> ApiResult<Response> {
    let artifact = state.store.claim(&name).await?;
    let file = artifact.open().await?;
    let len = artifact.len();
    tracing::info!(bytes = len, "Serving artifact");

    let body = async_stream::stream! {
        let mut artifact = Some(artifact);
        let mut reader = ReaderStream::new(file);
        let mut sent: u64 = 0;

        while let Some(chunk) = reader.next().await {
            match chunk {
                Ok(chunk) => {
                    sent += chunk.len() as u64;
                    // Delete when the last chunk is handed to the server.
                    // Once Content-Length is satisfied the body may be
                    // dropped without another poll, so there is no later
                    // point that still observes the response.
                    if sent >= len {
                        if let Some(artifact) = artifact.take() {
                            artifact.complete().await;
                        }
                    }
                    yield Ok::<_, std::io::Error>(chunk);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Artifact read failed");
                    yield Err(e);
                    break;
                }
            }
        }
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/mpeg".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(artifact_stem(&name))),
            (HeaderName::from_static(REQUEST_ID_HEADER), request_id.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Build artifact retrieval routes
pub fn files_routes() -> Router<AppState> {
    Router::new().route("/files/:name", get(fetch_artifact))
}
