//! Request-scoped temp resources
//!
//! Every temp file a request creates is a [`TempResource`] obtained from that
//! request's [`ResourceScope`]. A resource moves `Created → InUse → Released`
//! and reaches `Released` exactly once: through [`TempResource::release`],
//! through [`TempResource::persist`] (ownership handed to the artifact store),
//! or through `Drop` on any other exit path, including errors and a dropped
//! (cancelled) request future.
//!
//! File names are `<request_id>-<kind>.<ext>` and are created with
//! `create_new`, so two concurrent requests can never share or overwrite a
//! file.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tagdl_common::RequestId;
use tracing::{debug, warn};

/// What a temp resource holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Audio,
    Cover,
    Output,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Audio => "audio",
            ResourceKind::Cover => "cover",
            ResourceKind::Output => "output",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a temp resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Created,
    InUse,
    Released,
}

#[derive(Debug, Default)]
struct TrackerCounters {
    created: AtomicU64,
    released: AtomicU64,
}

/// Process-wide count of lifecycle events.
///
/// Lock-free; the only state shared across requests besides configuration.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    counters: Arc<TrackerCounters>,
}

/// Point-in-time view of the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceCounts {
    pub created: u64,
    pub released: u64,
    pub live: u64,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> u64 {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> u64 {
        // Read released first so a concurrent release never underflows
        let released = self.released();
        self.created().saturating_sub(released)
    }

    pub fn snapshot(&self) -> ResourceCounts {
        let released = self.released();
        let created = self.created();
        ResourceCounts {
            created,
            released,
            live: created.saturating_sub(released),
        }
    }

    fn record_created(&self) {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
    }

    fn record_released(&self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory for the temp resources of one request
#[derive(Debug, Clone)]
pub struct ResourceScope {
    request_id: RequestId,
    dir: PathBuf,
    tracker: ResourceTracker,
}

impl ResourceScope {
    pub fn new(request_id: RequestId, dir: impl Into<PathBuf>, tracker: ResourceTracker) -> Self {
        Self {
            request_id,
            dir: dir.into(),
            tracker,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Path a resource of `kind` would get in this scope
    pub fn path_for(&self, kind: ResourceKind, ext: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.{}", self.request_id, kind, ext))
    }

    /// Create an empty file for `kind`. Fails if the name is already taken.
    pub async fn create(&self, kind: ResourceKind, ext: &str) -> std::io::Result<TempResource> {
        let path = self.path_for(kind, ext);
        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        self.tracker.record_created();
        debug!(
            request_id = %self.request_id,
            kind = %kind,
            path = %path.display(),
            "Temp resource created"
        );

        Ok(TempResource {
            kind,
            path,
            request_id: self.request_id,
            state: ResourceState::Created,
            tracker: self.tracker.clone(),
        })
    }
}

/// A temp file owned by exactly one request
#[derive(Debug)]
pub struct TempResource {
    kind: ResourceKind,
    path: PathBuf,
    request_id: RequestId,
    state: ResourceState,
    tracker: ResourceTracker,
}

impl TempResource {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Record that the resource is being read or written by a consumer
    pub fn mark_in_use(&mut self) {
        if self.state == ResourceState::Created {
            self.state = ResourceState::InUse;
        }
    }

    /// Open the file for (re)writing from offset zero
    pub async fn open_truncated(&mut self) -> std::io::Result<tokio::fs::File> {
        self.mark_in_use();
        tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
    }

    /// Current file size
    pub async fn file_size(&self) -> std::io::Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    /// Delete the file now
    pub async fn release(mut self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    request_id = %self.request_id,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to delete temp resource"
                );
            }
        }
        self.mark_released();
    }

    /// Move the file to `dest`; ownership passes to whoever owns `dest`.
    ///
    /// On error the resource is still released by `Drop`.
    pub async fn persist(mut self, dest: &Path) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, dest).await?;
        debug!(
            request_id = %self.request_id,
            kind = %self.kind,
            dest = %dest.display(),
            "Temp resource persisted"
        );
        self.mark_released();
        Ok(())
    }

    fn mark_released(&mut self) {
        if self.state != ResourceState::Released {
            self.state = ResourceState::Released;
            self.tracker.record_released();
            debug!(
                request_id = %self.request_id,
                kind = %self.kind,
                "Temp resource released"
            );
        }
    }
}

impl Drop for TempResource {
    fn drop(&mut self) {
        if self.state == ResourceState::Released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    request_id = %self.request_id,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to delete temp resource on drop"
                );
            }
        }
        self.mark_released();
    }
}
