//! Pipeline components
//!
//! Metadata resolution, audio source selection, cover fetching, muxing and
//! delivery, plus the temp-resource lifecycle they all share.

pub mod artifact_store;
pub mod audio_source;
pub mod cover_fetcher;
pub mod delivery;
pub mod janitor;
pub mod media_id;
pub mod metadata_resolver;
pub mod muxer;
pub mod pipeline;
pub mod resources;

pub use artifact_store::{ArtifactStore, ClaimedArtifact, StoreError};
pub use audio_source::{
    AudioProvider, AudioStream, HttpAudioProvider, SelectedAudio, SourceError, SourceSelector,
    UpstreamError,
};
pub use cover_fetcher::{Cover, CoverArt, CoverError, CoverFetcher};
pub use metadata_resolver::{HttpMetadataProvider, MetadataError, MetadataProvider, MetadataResolver};
pub use muxer::{FfmpegEngine, MuxError, MuxRun, MuxSpec, TranscodeEngine};
pub use resources::{ResourceCounts, ResourceKind, ResourceScope, ResourceTracker, TempResource};
