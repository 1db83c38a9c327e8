//! Delivery channel
//!
//! Direct streaming forwards the engine's piped output as the response body.
//! Headers are committed only once the first output chunk exists; a failure
//! after that aborts the body with an error instead of ending it cleanly, so
//! the client sees a broken transfer rather than a truncated file.
//!
//! Handle mode renders into the request's output resource, checks it, and
//! hands it to the [`ArtifactStore`].

use axum::body::Body;
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tagdl_common::RequestId;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::io::ReaderStream;

use crate::error::{ErrorKind, PipelineError, REQUEST_ID_HEADER};
use crate::services::artifact_store::ArtifactStore;
use crate::services::muxer::{MuxError, MuxRun, MuxSpec, TranscodeEngine};
use crate::services::resources::TempResource;

/// `attachment; filename="<stem>.mp3"`
pub fn content_disposition(stem: &str) -> String {
    format!("attachment; filename=\"{}.mp3\"", stem)
}

/// Everything the body stream owns until the transfer ends
struct StreamGuard {
    request_id: RequestId,
    run: Option<MuxRun>,
    inputs: Vec<TempResource>,
    bytes_sent: u64,
    done: bool,
}

impl StreamGuard {
    async fn finish(&mut self, deadline: Instant, limit: Duration) -> Result<(), MuxError> {
        let Some(run) = self.run.take() else {
            return Ok(());
        };
        timeout_at(deadline, run.finish())
            .await
            .unwrap_or(Err(MuxError::TimedOut(limit)))
    }

    async fn complete(&mut self) {
        self.done = true;
        for input in self.inputs.drain(..) {
            input.release().await;
        }
        tracing::info!(
            request_id = %self.request_id,
            bytes = self.bytes_sent,
            "Stream delivered"
        );
    }

    fn abort(&mut self, error: &MuxError) {
        self.done = true;
        tracing::error!(
            request_id = %self.request_id,
            error_kind = ErrorKind::Processing.as_str(),
            bytes = self.bytes_sent,
            error = %error,
            "Transcode failed mid-stream, aborting response"
        );
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.done {
            // Body dropped before the end: the client went away
            tracing::warn!(
                request_id = %self.request_id,
                error_kind = ErrorKind::Delivery.as_str(),
                bytes = self.bytes_sent,
                "Client disconnected mid-stream, transcode cancelled"
            );
        }
    }
}

/// Start the engine and stream its output as the response
pub async fn stream(
    engine: &dyn TranscodeEngine,
    spec: MuxSpec,
    inputs: Vec<TempResource>,
    request_id: RequestId,
    stem: &str,
    limit: Duration,
) -> Result<Response, PipelineError> {
    let deadline = Instant::now() + limit;

    let mut run = timeout_at(deadline, engine.start(spec))
        .await
        .unwrap_or(Err(MuxError::TimedOut(limit)))?;
    let output = run
        .take_output()
        .ok_or_else(|| MuxError::Failed(format!("{} produced no output pipe", engine.name())))?;
    let mut reader = ReaderStream::new(output);

    let first = match timeout_at(deadline, reader.next()).await {
        Err(_) => return Err(MuxError::TimedOut(limit).into()),
        Ok(Some(Err(e))) => return Err(MuxError::Io(e).into()),
        Ok(Some(Ok(chunk))) => chunk,
        Ok(None) => {
            // Engine closed its output without writing anything
            timeout_at(deadline, run.finish())
                .await
                .unwrap_or(Err(MuxError::TimedOut(limit)))?;
            return Err(MuxError::EmptyOutput.into());
        }
    };

    let mut guard = StreamGuard {
        request_id,
        run: Some(run),
        inputs,
        bytes_sent: first.len() as u64,
        done: false,
    };

    let body = async_stream::stream! {
        yield Ok::<Bytes, std::io::Error>(first);

        let failure = loop {
            match timeout_at(deadline, reader.next()).await {
                Ok(Some(Ok(chunk))) => {
                    guard.bytes_sent += chunk.len() as u64;
                    yield Ok(chunk);
                }
                Ok(Some(Err(e))) => break Some(MuxError::Io(e)),
                Ok(None) => break None,
                Err(_) => break Some(MuxError::TimedOut(limit)),
            }
        };

        let failure = match failure {
            Some(e) => Some(e),
            None => guard.finish(deadline, limit).await.err(),
        };

        match failure {
            None => guard.complete().await,
            Some(e) => {
                guard.abort(&e);
                yield Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
            }
        }
    };

    tracing::info!(request_id = %request_id, filename = %stem, "Streaming tagged output");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/mpeg".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(stem)),
            (HeaderName::from_static(REQUEST_ID_HEADER), request_id.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Render into `output`, verify it, and publish it; returns the artifact name
pub async fn materialize(
    engine: &dyn TranscodeEngine,
    spec: MuxSpec,
    inputs: Vec<TempResource>,
    output: TempResource,
    store: &ArtifactStore,
    stem: &str,
    limit: Duration,
) -> Result<String, PipelineError> {
    let transcode = async {
        match engine.start(spec).await {
            Ok(run) => run.finish().await,
            Err(e) => Err(e),
        }
    };
    timeout(limit, transcode)
        .await
        .unwrap_or(Err(MuxError::TimedOut(limit)))?;

    if output.file_size().await? == 0 {
        return Err(MuxError::EmptyOutput.into());
    }

    for input in inputs {
        input.release().await;
    }

    Ok(store.publish(output, stem).await?)
}
