//! tagdl-server library interface
//!
//! Exposes the router and application state for the binary and for
//! integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiFailure, ApiResult, PipelineError, RequestFailure};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::services::{
    ArtifactStore, AudioProvider, CoverFetcher, FfmpegEngine, HttpAudioProvider,
    HttpMetadataProvider, MetadataResolver, ResourceTracker, SourceSelector, TranscodeEngine,
};

/// Connect timeout shared by all upstream clients; per-call bounds come from config
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state shared across handlers
///
/// Everything here is immutable after startup except the resource tracker
/// counters.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub resolver: Arc<MetadataResolver>,
    pub sources: Arc<SourceSelector>,
    pub covers: Arc<CoverFetcher>,
    pub engine: Arc<dyn TranscodeEngine>,
    pub store: Arc<ArtifactStore>,
    pub resources: ResourceTracker,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// State backed by the configured ffmpeg binary
    pub fn new(config: ServiceConfig) -> tagdl_common::Result<Self> {
        let engine = Arc::new(FfmpegEngine::new(config.mux.ffmpeg_path.clone()));
        Self::with_engine(config, engine)
    }

    pub fn with_engine(
        config: ServiceConfig,
        engine: Arc<dyn TranscodeEngine>,
    ) -> tagdl_common::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("tagdl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                tagdl_common::Error::Internal(format!("Failed to build HTTP client: {}", e))
            })?;

        let metadata_provider = Arc::new(HttpMetadataProvider::new(
            http_client.clone(),
            config.metadata.endpoint.clone(),
        ));
        let resolver = MetadataResolver::new(metadata_provider, config.metadata_timeout());

        let providers: Vec<Arc<dyn AudioProvider>> = config
            .providers
            .iter()
            .map(|p| Arc::new(HttpAudioProvider::new(p, http_client.clone())) as Arc<dyn AudioProvider>)
            .collect();
        let sources = SourceSelector::new(providers, config.attempt_timeout(), config.audio.max_bytes);

        let covers = CoverFetcher::new(
            http_client,
            config.cover.policy,
            config.cover_timeout(),
            config.cover.max_bytes,
        );

        let store = ArtifactStore::new(config.artifacts_dir());

        Ok(Self {
            config: Arc::new(config),
            resolver: Arc::new(resolver),
            sources: Arc::new(sources),
            covers: Arc::new(covers),
            engine,
            store: Arc::new(store),
            resources: ResourceTracker::new(),
            startup_time: Utc::now(),
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::download_routes())
        .merge(api::files_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
