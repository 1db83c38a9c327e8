//! Tagging muxer
//!
//! Combines the spooled audio, the optional cover image and the tag set into
//! one MP3 container with an ID3v2 attached-picture frame. The work is
//! described by a declarative [`MuxSpec`] and executed by a
//! [`TranscodeEngine`]; the production engine is an ffmpeg child process.
//!
//! A [`MuxRun`] owns the running engine. Dropping it before completion kills
//! the engine, so a cancelled request never leaves a transcode behind.

use futures::future::BoxFuture;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Bytes of engine stderr kept for diagnostics
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("transcode engine not found: {0}")]
    EngineNotFound(String),

    #[error("failed to start transcode engine: {0}")]
    Spawn(std::io::Error),

    #[error("transcode failed: {0}")]
    Failed(String),

    #[error("transcode timed out after {0:?}")]
    TimedOut(Duration),

    #[error("transcode produced no output")]
    EmptyOutput,

    #[error("transcode I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cover image input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverInput {
    pub path: PathBuf,
    /// Re-encode to JPEG instead of copying the image stream
    pub reencode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    Encode { bitrate_kbps: u32 },
    Copy,
}

/// Where the engine writes the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxTarget {
    /// Engine stdout, read through [`MuxRun::take_output`]
    Pipe,
    File(PathBuf),
}

/// Declarative transcode request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxSpec {
    pub audio_input: PathBuf,
    pub cover_input: Option<CoverInput>,
    pub audio: AudioEncoding,
    /// Container-level tags, written verbatim
    pub tags: Vec<(String, String)>,
    pub target: MuxTarget,
}

impl MuxSpec {
    /// ffmpeg command line for this spec
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        args.push("-i".to_string());
        args.push(self.audio_input.display().to_string());
        if let Some(cover) = &self.cover_input {
            args.push("-i".to_string());
            args.push(cover.path.display().to_string());
        }

        args.extend(["-map".to_string(), "0:a:0".to_string()]);

        if let Some(cover) = &self.cover_input {
            let codec = if cover.reencode { "mjpeg" } else { "copy" };
            for arg in [
                "-map",
                "1:v:0",
                "-c:v",
                codec,
                "-disposition:v:0",
                "attached_pic",
                "-metadata:s:v:0",
                "title=Album cover",
                "-metadata:s:v:0",
                "comment=Cover (front)",
            ] {
                args.push(arg.to_string());
            }
        }

        match self.audio {
            AudioEncoding::Encode { bitrate_kbps } => {
                args.extend([
                    "-c:a".to_string(),
                    "libmp3lame".to_string(),
                    "-b:a".to_string(),
                    format!("{}k", bitrate_kbps),
                ]);
            }
            AudioEncoding::Copy => {
                args.extend(["-c:a".to_string(), "copy".to_string()]);
            }
        }

        // Drop whatever tags the provider's container carried
        args.extend([
            "-map_metadata".to_string(),
            "-1".to_string(),
            "-id3v2_version".to_string(),
            "3".to_string(),
        ]);
        for (key, value) in &self.tags {
            args.push("-metadata".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.extend(["-f".to_string(), "mp3".to_string()]);
        match &self.target {
            MuxTarget::Pipe => args.push("pipe:1".to_string()),
            MuxTarget::File(path) => args.push(path.display().to_string()),
        }

        args
    }
}

pub type MuxOutput = Pin<Box<dyn AsyncRead + Send>>;

/// A started transcode
pub struct MuxRun {
    output: Option<MuxOutput>,
    completion: BoxFuture<'static, Result<(), MuxError>>,
}

impl MuxRun {
    pub fn new<F>(output: Option<MuxOutput>, completion: F) -> Self
    where
        F: Future<Output = Result<(), MuxError>> + Send + 'static,
    {
        Self {
            output,
            completion: Box::pin(completion),
        }
    }

    /// Output reader for [`MuxTarget::Pipe`] runs; taken at most once
    pub fn take_output(&mut self) -> Option<MuxOutput> {
        self.output.take()
    }

    /// Wait for the engine to exit. Any unread piped output is discarded first.
    pub async fn finish(mut self) -> Result<(), MuxError> {
        drop(self.output.take());
        self.completion.await
    }
}

impl std::fmt::Debug for MuxRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxRun")
            .field("has_output", &self.output.is_some())
            .finish_non_exhaustive()
    }
}

/// Transcode engine contract
#[async_trait::async_trait]
pub trait TranscodeEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start the transcode. Returns once the engine is running.
    async fn start(&self, spec: MuxSpec) -> Result<MuxRun, MuxError>;
}

/// ffmpeg as a child process
pub struct FfmpegEngine {
    binary: PathBuf,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Whether the configured binary can be executed
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Keep only the last `STDERR_TAIL_BYTES` of the engine's stderr
async fn drain_tail(mut stderr: impl AsyncRead + Unpin) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

#[async_trait::async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn start(&self, spec: MuxSpec) -> Result<MuxRun, MuxError> {
        let args = spec.ffmpeg_args();
        tracing::debug!(binary = %self.binary.display(), args = ?args, "Starting ffmpeg");

        let stdout = match spec.target {
            MuxTarget::Pipe => Stdio::piped(),
            MuxTarget::File(_) => Stdio::null(),
        };

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    MuxError::EngineNotFound(self.binary.display().to_string())
                }
                _ => MuxError::Spawn(e),
            })?;

        let output = child
            .stdout
            .take()
            .map(|stdout| Box::pin(stdout) as MuxOutput);

        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(drain_tail(stderr)));

        // The child moves into the completion future; dropping the run kills it
        let completion = async move {
            let status = child.wait().await?;
            let diagnostics = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };

            if status.success() {
                if !diagnostics.is_empty() {
                    tracing::debug!(stderr = %diagnostics, "ffmpeg finished with diagnostics");
                }
                Ok(())
            } else if diagnostics.is_empty() {
                Err(MuxError::Failed(format!("ffmpeg exited with {}", status)))
            } else {
                Err(MuxError::Failed(format!(
                    "ffmpeg exited with {}: {}",
                    status, diagnostics
                )))
            }
        };

        Ok(MuxRun::new(output, completion))
    }
}
