//! Service configuration for tagdl-server
//!
//! Loaded once at startup from the TOML file (see `tagdl_common::config`),
//! overridden by CLI arguments, validated, then shared read-only as
//! `Arc<ServiceConfig>` for the process lifetime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tagdl_common::config::{load_toml_config, LoggingConfig, ARTIFACTS_SUBDIR, TEMP_SUBDIR};
use tagdl_common::{Error, Result};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5780;

/// Complete service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Prefix for handle-mode download URLs, e.g. `https://dl.example.com`.
    /// Relative `/files/<name>` URLs are returned when unset.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Root folder; `tmp/` and `artifacts/` live below it
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub cover: CoverConfig,
    #[serde(default)]
    pub mux: MuxConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Metadata provider endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// URL template; `{id}` is replaced by the media ID
    #[serde(default = "default_metadata_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_metadata_timeout_ms")]
    pub timeout_ms: u64,
}

/// One upstream audio provider
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    /// URL template; `{url}` is the percent-encoded source URL, `{id}` the media ID
    pub url: String,
}

/// Audio source selection limits
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Bound on one provider attempt (request plus spooling the body)
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Optional cap on the audio body size
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

/// What a failed cover fetch does to the request
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoverPolicy {
    /// Proceed without an embedded image
    #[default]
    Degrade,
    /// Fail the whole request
    Strict,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverConfig {
    #[serde(default)]
    pub policy: CoverPolicy,
    #[serde(default = "default_cover_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_cover_max_bytes")]
    pub max_bytes: u64,
}

/// Transcode engine settings
#[derive(Debug, Clone, Deserialize)]
pub struct MuxConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,
    /// Copy the provider's audio stream instead of re-encoding
    #[serde(default)]
    pub passthrough: bool,
    /// Bound on the whole transcode, streaming included
    #[serde(default = "default_mux_timeout_ms")]
    pub timeout_ms: u64,
}

/// How the tagged output reaches the client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Stream the muxer output as the response body
    #[default]
    Stream,
    /// Materialize to the artifact store and return a download URL
    Handle,
}

impl std::str::FromStr for DeliveryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stream" => Ok(DeliveryMode::Stream),
            "handle" => Ok(DeliveryMode::Handle),
            other => Err(Error::Config(format!(
                "Unknown delivery mode '{}' (expected 'stream' or 'handle')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub mode: DeliveryMode,
    /// Unclaimed artifacts older than this are deleted by the janitor
    #[serde(default = "default_artifact_ttl_secs")]
    pub artifact_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_metadata_endpoint() -> String {
    "https://vivekfy.vercel.app/yt?videoId={id}".to_string()
}

fn default_metadata_timeout_ms() -> u64 {
    10_000
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig {
        name: "vivekfy".to_string(),
        url: "https://vivekfy.vercel.app/stream?url={url}".to_string(),
    }]
}

fn default_attempt_timeout_ms() -> u64 {
    60_000
}

fn default_cover_timeout_ms() -> u64 {
    10_000
}

fn default_cover_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_bitrate_kbps() -> u32 {
    192
}

fn default_mux_timeout_ms() -> u64 {
    300_000
}

fn default_artifact_ttl_secs() -> u64 {
    3_600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: default_metadata_endpoint(),
            timeout_ms: default_metadata_timeout_ms(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_bytes: None,
        }
    }
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            policy: CoverPolicy::default(),
            timeout_ms: default_cover_timeout_ms(),
            max_bytes: default_cover_max_bytes(),
        }
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            bitrate_kbps: default_bitrate_kbps(),
            passthrough: false,
            timeout_ms: default_mux_timeout_ms(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::default(),
            artifact_ttl_secs: default_artifact_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            public_base_url: None,
            root_folder: None,
            logging: LoggingConfig::default(),
            metadata: MetadataConfig::default(),
            providers: default_providers(),
            audio: AudioConfig::default(),
            cover: CoverConfig::default(),
            mux: MuxConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from a TOML file; a missing file yields defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        match load_toml_config::<ServiceConfig>(path)? {
            Some(config) => {
                tracing::info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            None => {
                tracing::warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.metadata.endpoint.contains("{id}") {
            return Err(Error::Config(
                "metadata.endpoint must contain an {id} placeholder".to_string(),
            ));
        }

        if self.providers.is_empty() {
            return Err(Error::Config(
                "At least one [[providers]] entry is required".to_string(),
            ));
        }

        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(Error::Config("Provider name must not be empty".to_string()));
            }
            if !provider.url.contains("{url}") && !provider.url.contains("{id}") {
                return Err(Error::Config(format!(
                    "Provider '{}' url must contain {{url}} or {{id}}",
                    provider.name
                )));
            }
        }

        let timeouts = [
            ("metadata.timeout_ms", self.metadata.timeout_ms),
            ("audio.attempt_timeout_ms", self.audio.attempt_timeout_ms),
            ("cover.timeout_ms", self.cover.timeout_ms),
            ("mux.timeout_ms", self.mux.timeout_ms),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", key)));
            }
        }

        if !self.mux.passthrough && self.mux.bitrate_kbps == 0 {
            return Err(Error::Config(
                "mux.bitrate_kbps must be greater than zero".to_string(),
            ));
        }

        if self.delivery.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "delivery.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata.timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.audio.attempt_timeout_ms)
    }

    pub fn cover_timeout(&self) -> Duration {
        Duration::from_millis(self.cover.timeout_ms)
    }

    pub fn mux_timeout(&self) -> Duration {
        Duration::from_millis(self.mux.timeout_ms)
    }

    pub fn artifact_ttl(&self) -> Duration {
        Duration::from_secs(self.delivery.artifact_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.delivery.sweep_interval_secs)
    }

    /// Root folder, falling back to the current directory when unresolved
    pub fn root(&self) -> PathBuf {
        self.root_folder
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root().join(TEMP_SUBDIR)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root().join(ARTIFACTS_SUBDIR)
    }
}
