//! Shared fixtures for tagdl-server integration tests
//!
//! - [`Upstream`]: an in-process axum server standing in for the metadata
//!   provider, the audio providers and the cover host.
//! - [`FakeEngine`]: a [`TranscodeEngine`] that writes a readable text
//!   header (tags, cover flag) followed by the input audio bytes.
//! - [`TestApp`]: router + state wired to both, rooted in a `TempDir`.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tagdl_server::config::{ProviderConfig, ServiceConfig};
use tagdl_server::services::muxer::{MuxError, MuxRun, MuxSpec, MuxTarget, TranscodeEngine};
use tagdl_server::AppState;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;

/// Valid 1x1 PNG
pub const PNG_1X1: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0xDA, 0x63, 0x64,
    0x60, 0xF8, 0x5F, 0x0F, 0x00, 0x02, 0x87, 0x01, 0x80, 0xEB, 0x47, 0xBA, 0x92, 0x00, 0x00,
    0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Media IDs with scripted upstream behaviour
pub const MISSING_META: &str = "missingmeta";
pub const BROKEN_META: &str = "servererror";
pub const SLASH_TITLE: &str = "slashtitle1";
pub const EXACT_TITLE: &str = "exactTitleT";
pub const NO_COVER: &str = "nocoverart1";

pub const TEST_ARTIST: &str = "Test Artist";

pub fn youtu_be(media_id: &str) -> String {
    format!("https://youtu.be/{}", media_id)
}

/// Per-endpoint hit counters of the fake upstream
#[derive(Default)]
pub struct Hits {
    counts: Mutex<HashMap<String, usize>>,
}

impl Hits {
    fn record(&self, key: &str) {
        *self.counts.lock().unwrap().entry(key.to_string()).or_default() += 1;
    }

    pub fn get(&self, key: &str) -> usize {
        self.counts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().unwrap().values().sum()
    }
}

#[derive(Clone)]
struct UpstreamState {
    base: String,
    hits: Arc<Hits>,
}

/// Fake metadata provider, audio providers and cover host
pub struct Upstream {
    pub addr: SocketAddr,
    pub hits: Arc<Hits>,
}

impl Upstream {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(Hits::default());
        let state = UpstreamState {
            base: format!("http://{}", addr),
            hits: hits.clone(),
        };

        let app = Router::new()
            .route("/yt", get(metadata))
            .route("/:provider/stream", get(audio))
            .route("/cover/:file", get(cover))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, hits }
    }

    pub fn base(&self) -> String {
        format!("http://{}", self.addr)
    }
}

async fn metadata(
    State(state): State<UpstreamState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.hits.record("meta");
    let id = params.get("videoId").cloned().unwrap_or_default();
    let shared_cover = format!("{}/cover/shared.png", state.base);

    match id.as_str() {
        MISSING_META => StatusCode::NOT_FOUND.into_response(),
        BROKEN_META => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        SLASH_TITLE => Json(serde_json::json!({
            "title": "My/Song:Title?",
            "author": TEST_ARTIST,
            "thumbnail": shared_cover,
        }))
        .into_response(),
        EXACT_TITLE => Json(serde_json::json!({
            "title": "T",
            "author": TEST_ARTIST,
            "thumbnail": shared_cover,
        }))
        .into_response(),
        NO_COVER => Json(serde_json::json!({
            "title": "No Cover",
            "author": TEST_ARTIST,
            "thumbnail": format!("{}/cover/missing.png", state.base),
        }))
        .into_response(),
        _ => Json(serde_json::json!({
            "title": format!("Title {}", id),
            "author": TEST_ARTIST,
            "thumbnail": shared_cover,
        }))
        .into_response(),
    }
}

/// Audio bytes a provider serves for a media ID
pub fn audio_bytes(provider: &str, media_id: &str) -> String {
    format!("AUDIO-FROM-{}-{}", provider, media_id)
}

async fn audio(
    State(state): State<UpstreamState>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.hits.record(&provider);
    let id = params.get("id").cloned().unwrap_or_default();

    match provider.as_str() {
        "fail" => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        "html" => (
            [(header::CONTENT_TYPE, "text/html")],
            "<html>rate limited</html>",
        )
            .into_response(),
        "empty" => ([(header::CONTENT_TYPE, "audio/mpeg")], Vec::<u8>::new()).into_response(),
        "redirect" => Json(serde_json::json!({
            "url": format!("{}/ok/stream?id={}", state.base, id),
        }))
        .into_response(),
        "hang" => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
        name => (
            [(header::CONTENT_TYPE, "audio/mpeg")],
            audio_bytes(name, &id).into_bytes(),
        )
            .into_response(),
    }
}

async fn cover(State(state): State<UpstreamState>, Path(file): Path<String>) -> Response {
    state.hits.record("cover");
    if file == "missing.png" {
        return StatusCode::NOT_FOUND.into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], PNG_1X1).into_response()
}

/// How the fake engine behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMode {
    /// Write header + audio, exit cleanly
    Succeed,
    /// Exit with an error before writing anything
    Fail,
    /// Run forever without producing output
    Hang,
    /// Produce output forever
    Endless,
}

/// Decrements the running count when the run goes away
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Aborts the writer task when the run goes away
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct FakeEngine {
    mode: Mutex<FakeMode>,
    running: Arc<AtomicUsize>,
    started: AtomicUsize,
    last_spec: Mutex<Option<MuxSpec>>,
}

impl FakeEngine {
    pub fn new(mode: FakeMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            running: Arc::new(AtomicUsize::new(0)),
            started: AtomicUsize::new(0),
            last_spec: Mutex::new(None),
        })
    }

    pub fn set_mode(&self, mode: FakeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Runs started and not yet finished or dropped
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn last_spec(&self) -> Option<MuxSpec> {
        self.last_spec.lock().unwrap().clone()
    }
}

/// Header the fake engine writes in front of the audio
pub fn fake_header(spec: &MuxSpec) -> String {
    let mut header = String::from("FAKEMUX\n");
    for (key, value) in &spec.tags {
        header.push_str(&format!("{}={}\n", key, value));
    }
    header.push_str(if spec.cover_input.is_some() {
        "cover=yes\n"
    } else {
        "cover=no\n"
    });
    header
}

#[async_trait::async_trait]
impl TranscodeEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn start(&self, spec: MuxSpec) -> Result<MuxRun, MuxError> {
        let mode = *self.mode.lock().unwrap();
        *self.last_spec.lock().unwrap() = Some(spec.clone());
        self.started.fetch_add(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);
        let guard = RunningGuard(self.running.clone());

        let mut content = fake_header(&spec).into_bytes();
        content.extend(tokio::fs::read(&spec.audio_input).await?);

        match spec.target {
            MuxTarget::File(path) => {
                let completion = async move {
                    let _guard = guard;
                    match mode {
                        FakeMode::Succeed => {
                            tokio::fs::write(&path, &content).await?;
                            Ok(())
                        }
                        FakeMode::Fail => Err(MuxError::Failed("fake engine failure".to_string())),
                        FakeMode::Hang | FakeMode::Endless => {
                            futures::future::pending::<()>().await;
                            Ok(())
                        }
                    }
                };
                Ok(MuxRun::new(None, completion))
            }
            MuxTarget::Pipe => {
                let (mut writer, reader) = tokio::io::duplex(16 * 1024);
                let writer_task = tokio::spawn(async move {
                    match mode {
                        FakeMode::Succeed => {
                            let _ = writer.write_all(&content).await;
                        }
                        FakeMode::Fail => {}
                        FakeMode::Hang => {
                            futures::future::pending::<()>().await;
                        }
                        FakeMode::Endless => loop {
                            if writer.write_all(&content).await.is_err() {
                                break;
                            }
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        },
                    }
                });
                let abort = AbortOnDrop(writer_task);

                let completion = async move {
                    let _guard = guard;
                    let mut abort = abort;
                    let _ = (&mut abort.0).await;
                    match mode {
                        FakeMode::Fail => Err(MuxError::Failed("fake engine failure".to_string())),
                        _ => Ok(()),
                    }
                };
                Ok(MuxRun::new(Some(Box::pin(reader)), completion))
            }
        }
    }
}

/// Router, state and fakes for one test
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub engine: Arc<FakeEngine>,
    pub upstream: Upstream,
    pub root: TempDir,
}

impl TestApp {
    /// Providers are upstream route names tried in the given order
    pub async fn new(providers: &[&str]) -> Self {
        Self::with_config(providers, FakeMode::Succeed, |_| {}).await
    }

    pub async fn with_config(
        providers: &[&str],
        mode: FakeMode,
        configure: impl FnOnce(&mut ServiceConfig),
    ) -> Self {
        let upstream = Upstream::start().await;
        let root = TempDir::new().unwrap();
        let base = upstream.base();

        let mut config = ServiceConfig::default();
        config.root_folder = Some(root.path().to_path_buf());
        config.metadata.endpoint = format!("{}/yt?videoId={{id}}", base);
        config.metadata.timeout_ms = 2_000;
        config.providers = providers
            .iter()
            .map(|name| ProviderConfig {
                name: name.to_string(),
                url: format!("{}/{}/stream?id={{id}}&url={{url}}", base, name),
            })
            .collect();
        config.audio.attempt_timeout_ms = 2_000;
        config.cover.timeout_ms = 2_000;
        config.mux.timeout_ms = 2_000;
        configure(&mut config);
        config.validate().unwrap();

        std::fs::create_dir_all(config.temp_dir()).unwrap();
        std::fs::create_dir_all(config.artifacts_dir()).unwrap();

        let engine = FakeEngine::new(mode);
        let state = AppState::with_engine(config, engine.clone()).unwrap();
        let app = tagdl_server::build_router(state.clone());

        Self {
            app,
            state,
            engine,
            upstream,
            root,
        }
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Files left in the temp directory
    pub fn temp_files(&self) -> usize {
        std::fs::read_dir(self.state.config.temp_dir()).unwrap().count()
    }

    /// Files in the artifact store
    pub fn artifact_files(&self) -> usize {
        std::fs::read_dir(self.state.config.artifacts_dir()).unwrap().count()
    }

    /// Created and released counts match and nothing is left on disk
    pub fn assert_all_released(&self) {
        let counts = self.state.resources.snapshot();
        assert_eq!(counts.created, counts.released, "{counts:?}");
        assert_eq!(counts.live, 0);
        assert_eq!(self.temp_files(), 0, "temp files left behind");
    }
}

/// `/download?url=<encoded youtu.be URL>` plus extra query
pub fn download_uri(media_id: &str, extra: &str) -> String {
    format!(
        "/download?url={}{}",
        urlencoding::encode(&youtu_be(media_id)),
        extra
    )
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header_str(response: &Response, name: &str) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
