//! Download pipeline
//!
//! Validate, resolve metadata, acquire inputs, mux, deliver.
//! Metadata must be known before anything else starts; audio selection and
//! the cover fetch then run concurrently. Every temp file comes from one
//! [`ResourceScope`], so whichever way this function exits (including the
//! future being dropped) each resource is released exactly once.

use axum::response::Response;

use crate::config::DeliveryMode;
use crate::error::PipelineError;
use crate::models::{MediaRequest, TagSet};
use crate::services::cover_fetcher::Cover;
use crate::services::delivery;
use crate::services::muxer::{AudioEncoding, CoverInput, MuxSpec, MuxTarget};
use crate::services::resources::{ResourceKind, ResourceScope};
use crate::AppState;

/// What the pipeline hands back to the HTTP layer
pub enum Delivered {
    /// Streaming response, headers already fixed
    Stream(Response),
    /// Stored artifact name for `GET /files/<name>`
    Handle(String),
}

impl std::fmt::Debug for Delivered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delivered::Stream(_) => f.write_str("Stream(..)"),
            Delivered::Handle(name) => f.debug_tuple("Handle").field(name).finish(),
        }
    }
}

pub async fn run(
    state: &AppState,
    request: MediaRequest,
    mode: DeliveryMode,
) -> Result<Delivered, PipelineError> {
    let config = &state.config;
    let scope = ResourceScope::new(request.request_id, config.temp_dir(), state.resources.clone());

    let metadata = state.resolver.resolve(&request.media_id).await?;
    let tags = TagSet::for_request(&request, &metadata);
    let stem = tags.file_stem();

    let (audio, cover) = tokio::try_join!(
        async {
            state
                .sources
                .select_into(&request, &scope)
                .await
                .map_err(PipelineError::from)
        },
        async {
            state
                .covers
                .fetch(metadata.cover_url.as_deref(), &scope)
                .await
                .map_err(PipelineError::from)
        },
    )?;

    let mut inputs = vec![audio.resource];
    let cover_input = match cover {
        Cover::Present(art) => {
            let input = CoverInput {
                path: art.resource.path().to_path_buf(),
                reencode: !art.format.embeds_directly(),
            };
            inputs.push(art.resource);
            Some(input)
        }
        Cover::Absent => None,
    };

    let encoding = if config.mux.passthrough {
        AudioEncoding::Copy
    } else {
        AudioEncoding::Encode {
            bitrate_kbps: config.mux.bitrate_kbps,
        }
    };

    for input in inputs.iter_mut() {
        input.mark_in_use();
    }

    let mut spec = MuxSpec {
        audio_input: inputs[0].path().to_path_buf(),
        cover_input,
        audio: encoding,
        tags: tags.pairs(),
        target: MuxTarget::Pipe,
    };

    tracing::info!(
        request_id = %request.request_id,
        provider = %audio.provider,
        audio_bytes = audio.bytes,
        has_cover = spec.cover_input.is_some(),
        engine = state.engine.name(),
        mode = ?mode,
        "Muxing"
    );

    match mode {
        DeliveryMode::Stream => {
            let response = delivery::stream(
                state.engine.as_ref(),
                spec,
                inputs,
                request.request_id,
                &stem,
                config.mux_timeout(),
            )
            .await?;
            Ok(Delivered::Stream(response))
        }
        DeliveryMode::Handle => {
            let output = scope.create(ResourceKind::Output, "mp3").await?;
            spec.target = MuxTarget::File(output.path().to_path_buf());
            let name = delivery::materialize(
                state.engine.as_ref(),
                spec,
                inputs,
                output,
                &state.store,
                &stem,
                config.mux_timeout(),
            )
            .await?;
            Ok(Delivered::Handle(name))
        }
    }
}
