//! The per-device lifecycle.
//!
//! ```text
//! DISCOVERED → MOUNT_CHECK → (MOUNT) → COPY → (TRANSCODE) → VERIFY → (CLEAR) → EJECT → DONE
//! ```
//!
//! [`Pipeline::process`] walks those stages strictly in order for one label.
//! Every stage except TRANSCODE ends the run on failure; TRANSCODE failures
//! are per file and only logged. VERIFY is the gate in front of CLEAR: the
//! source is never deleted unless every copied file is confirmed at its
//! destination. A run that copies nothing goes straight to EJECT.
//!
//! Progress goes to the [`Broadcaster`] as status lines and to the
//! [`StageBoard`] as the label's current stage.
//!
//! Proxy generation holds a per-destination lock, so a device run and an
//! on-demand reprocess never transcode into the same `Proxy/` at once.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use offload_core::config::Settings;
use offload_core::types::proxy_dir_for;
use offload_core::{
    status, Broadcaster, ConfigError, Failure, IngestError, IngestionProfile, ProcessError,
    Snapshot, Stage,
};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::host::{DeviceHost, Transcoder};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Devices mount at `<mount_base>/<label>`.
    pub mount_base: PathBuf,
    /// Pause after CLEAR.
    pub settle: Duration,
    pub native_clip_extension: String,
    pub playback_extension: String,
    /// Extensions eligible for proxies.
    pub proxy_extensions: Vec<String>,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mount_base: settings.engine.mount_base.clone(),
            settle: settings.engine.settle(),
            native_clip_extension: settings.engine.native_clip_extension.clone(),
            playback_extension: settings.engine.playback_extension.clone(),
            proxy_extensions: settings.transcoder.extensions.clone(),
        }
    }

    pub fn mount_point(&self, label: &str) -> PathBuf {
        self.mount_base.join(label)
    }

    /// File name a source entry is copied to: the native clip extension is
    /// swapped for the playback one, everything else is kept.
    pub fn destination_name(&self, name: &str) -> String {
        match strip_suffix_ignore_case(name, &self.native_clip_extension) {
            Some(stem) => format!("{stem}{}", self.playback_extension),
            None => name.to_string(),
        }
    }

    pub fn is_proxy_eligible(&self, name: &str) -> bool {
        self.proxy_extensions
            .iter()
            .any(|ext| strip_suffix_ignore_case(name, ext).is_some())
    }
}

fn strip_suffix_ignore_case<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = name.len().checked_sub(suffix.len())?;
    if !name.is_char_boundary(cut) || !name[cut..].eq_ignore_ascii_case(suffix) {
        return None;
    }
    Some(&name[..cut])
}

// ---------------------------------------------------------------------------
// Stage board
// ---------------------------------------------------------------------------

/// Current stage per label, for diagnostics.
#[derive(Debug, Default)]
pub struct StageBoard {
    stages: Mutex<BTreeMap<String, Stage>>,
}

impl StageBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Stage>> {
        self.stages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, label: &str, stage: Stage) {
        self.lock().insert(label.to_string(), stage);
    }

    pub fn get(&self, label: &str) -> Option<Stage> {
        self.lock().get(label).copied()
    }

    pub fn remove(&self, label: &str) -> Option<Stage> {
        self.lock().remove(label)
    }

    pub fn entries(&self) -> BTreeMap<String, Stage> {
        self.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One file COPY wrote, after any extension rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxySummary {
    pub created: usize,
    /// Already had a proxy; left alone.
    pub existing: usize,
    pub unsupported: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub copied: Vec<CopiedFile>,
    /// `None` when nothing was copied and TRANSCODE was skipped.
    pub proxies: Option<ProxySummary>,
    pub cleared: bool,
}

struct Entry {
    path: PathBuf,
    name: String,
    is_dir: bool,
}

/// Entries directly under `dir`, sorted by name.
async fn list_entries(dir: &Path) -> io::Result<Vec<Entry>> {
    let mut read = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = read.next_entry().await? {
        entries.push(Entry {
            path: entry.path(),
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: entry.file_type().await?.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives one device through its lifecycle. Cheap to clone; each lifecycle
/// task gets its own handle.
#[derive(Clone)]
pub struct Pipeline {
    host: Arc<dyn DeviceHost>,
    transcoder: Arc<dyn Transcoder>,
    status: Arc<Broadcaster>,
    board: Arc<StageBoard>,
    options: Arc<PipelineOptions>,
    proxy_locks: Arc<Mutex<BTreeMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        host: Arc<dyn DeviceHost>,
        transcoder: Arc<dyn Transcoder>,
        status: Arc<Broadcaster>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            host,
            transcoder,
            status,
            board: Arc::new(StageBoard::new()),
            options: Arc::new(options),
            proxy_locks: Arc::default(),
        }
    }

    pub fn host(&self) -> &Arc<dyn DeviceHost> {
        &self.host
    }

    pub fn status(&self) -> &Arc<Broadcaster> {
        &self.status
    }

    pub fn board(&self) -> &Arc<StageBoard> {
        &self.board
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    fn enter(&self, label: &str, stage: Stage) {
        tracing::debug!(label, stage = %stage, "stage transition");
        self.board.set(label, stage);
    }

    /// Run the full lifecycle for `label` against the snapshot it was
    /// dispatched with.
    pub async fn process(&self, label: &str, snapshot: Arc<Snapshot>) -> Result<Outcome, IngestError> {
        let profile = snapshot
            .profile(label)
            .ok_or_else(|| ConfigError::UnknownLabel(label.to_string()))?;
        let mount_point = self.options.mount_point(label);
        status!(self.status, "Starting processing for device: {label}");

        self.enter(label, Stage::MountCheck);
        self.ensure_mounted(label, &mount_point).await?;

        self.enter(label, Stage::Copy);
        let copied = self.copy_sources(label, &mount_point, profile, &snapshot).await?;

        if copied.is_empty() {
            status!(
                self.status,
                "No files copied from {label}. Skipping proxy creation and clearing."
            );
            self.enter(label, Stage::Eject);
            self.eject(label, &mount_point).await?;
            return Ok(Outcome {
                copied,
                proxies: None,
                cleared: false,
            });
        }

        self.enter(label, Stage::Transcode);
        status!(self.status, "Files were copied from {label}, creating proxies...");
        let proxies = self.create_proxies(&profile.destination).await;

        self.enter(label, Stage::Verify);
        self.verify(label, &copied).await?;

        self.enter(label, Stage::Clear);
        self.clear_sources(label, &mount_point, profile).await?;

        self.enter(label, Stage::Eject);
        self.eject(label, &mount_point).await?;

        Ok(Outcome {
            copied,
            proxies: Some(proxies),
            cleared: true,
        })
    }

    // -- MOUNT_CHECK / MOUNT -------------------------------------------------

    async fn check_mounted(&self, label: &str, mount_point: &Path) -> bool {
        if !exists(mount_point).await {
            status!(self.status, "Mount point does not exist: {}", mount_point.display());
            return false;
        }
        let mounted = self.host.is_mounted(mount_point).await;
        if mounted {
            status!(self.status, "Device {label} is mounted at {}", mount_point.display());
        } else {
            status!(self.status, "Device {label} is not mounted at {}", mount_point.display());
        }
        mounted
    }

    async fn ensure_mounted(&self, label: &str, mount_point: &Path) -> Result<(), IngestError> {
        if self.check_mounted(label, mount_point).await {
            return Ok(());
        }

        self.enter(label, Stage::Mount);
        tokio::fs::create_dir_all(mount_point).await.map_err(|e| {
            let context = format!("create mount point {}", mount_point.display());
            IngestError::at_stage(label, Stage::Mount, Failure::io(context, e))
        })?;
        self.host
            .mount(label, mount_point)
            .await
            .map_err(|e| IngestError::at_stage(label, Stage::Mount, e.into()))?;

        if !self.host.is_mounted(mount_point).await {
            let message = format!("{} is still not a mount point", mount_point.display());
            return Err(IngestError::at_stage(label, Stage::Mount, Failure::Message(message)));
        }
        status!(
            self.status,
            "Successfully mounted device {label} at {}",
            mount_point.display()
        );
        Ok(())
    }

    // -- COPY ------------------------------------------------------------------

    /// Copy every eligible file from the profile's source directories.
    /// Returns what was written, in copy order.
    pub async fn copy_sources(
        &self,
        label: &str,
        mount_point: &Path,
        profile: &IngestionProfile,
        snapshot: &Snapshot,
    ) -> Result<Vec<CopiedFile>, IngestError> {
        let copy_err = |context: String, e: io::Error| {
            IngestError::at_stage(label, Stage::Copy, Failure::io(context, e))
        };
        let mut copied = Vec::new();

        for dir in &profile.source_dirs {
            let source_dir = mount_point.join(dir);
            if !exists(&source_dir).await {
                status!(self.status, "Source directory does not exist: {}", source_dir.display());
                continue;
            }

            let entries = list_entries(&source_dir)
                .await
                .map_err(|e| copy_err(format!("read {}", source_dir.display()), e))?;
            status!(
                self.status,
                "Files found in {}: {}",
                source_dir.display(),
                entries.len()
            );

            tokio::fs::create_dir_all(&profile.destination)
                .await
                .map_err(|e| copy_err(format!("create {}", profile.destination.display()), e))?;

            for entry in entries.into_iter().filter(|e| !e.is_dir) {
                if snapshot.should_ignore(&entry.name) {
                    status!(self.status, "Ignoring file: {}", entry.name);
                    continue;
                }
                let destination = profile
                    .destination
                    .join(self.options.destination_name(&entry.name));
                self.host
                    .copy_file(&entry.path, &destination)
                    .await
                    .map_err(|e| IngestError::at_stage(label, Stage::Copy, e.into()))?;
                status!(
                    self.status,
                    "Copied file: {} to {}",
                    entry.path.display(),
                    destination.display()
                );
                copied.push(CopiedFile {
                    source: entry.path,
                    destination,
                });
            }
        }
        Ok(copied)
    }

    // -- TRANSCODE -------------------------------------------------------------

    /// Create proxies in `<destination>/Proxy/` for every eligible file that
    /// does not have one yet. Never fails: problems are logged and counted.
    pub async fn create_proxies(&self, destination: &Path) -> ProxySummary {
        let _held = self.lock_destination(destination).await;
        let mut summary = ProxySummary::default();
        let proxy_dir = proxy_dir_for(destination);

        let entries = match list_entries(destination).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(destination = %destination.display(), error = %e, "cannot list destination");
                status!(self.status, "Failed to read directory {}: {e}", destination.display());
                return summary;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(&proxy_dir).await {
            tracing::error!(proxy_dir = %proxy_dir.display(), error = %e, "cannot create proxy dir");
            status!(self.status, "Failed to create proxy directory {}: {e}", proxy_dir.display());
            return summary;
        }

        for entry in entries.into_iter().filter(|e| !e.is_dir) {
            if !self.options.is_proxy_eligible(&entry.name) {
                status!(self.status, "Skipping proxy creation for unsupported file: {}", entry.name);
                summary.unsupported += 1;
                continue;
            }
            let proxy = proxy_dir.join(&entry.name);
            if exists(&proxy).await {
                summary.existing += 1;
                continue;
            }

            match self.transcoder.transcode(&entry.path, &proxy).await {
                Ok(()) => {
                    status!(self.status, "Created proxy for {}", entry.name);
                    summary.created += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    let cancelled = matches!(e, ProcessError::Cancelled { .. });
                    self.discard_partial(&proxy).await;
                    status!(self.status, "Failed to create proxy for {}: {e}", entry.name);
                    let err = IngestError::Transcode {
                        path: entry.path,
                        failure: e.into(),
                    };
                    tracing::error!(error = %err, "transcode failed");
                    if cancelled {
                        break;
                    }
                }
            }
        }
        summary
    }

    async fn lock_destination(&self, destination: &Path) -> OwnedMutexGuard<()> {
        let lock = self
            .proxy_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(destination.to_path_buf())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    async fn discard_partial(&self, proxy: &Path) {
        match tokio::fs::remove_file(proxy).await {
            Ok(()) => tracing::debug!(proxy = %proxy.display(), "removed partial proxy"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(proxy = %proxy.display(), error = %e, "cannot remove partial proxy"),
        }
    }

    // -- VERIFY ----------------------------------------------------------------

    /// Every manifest destination must exist with its source's byte length.
    pub async fn verify(&self, label: &str, copied: &[CopiedFile]) -> Result<(), IngestError> {
        let failed = |path: &Path, detail: String| IngestError::Verification {
            label: label.to_string(),
            path: path.to_path_buf(),
            detail,
        };

        for file in copied {
            let written = tokio::fs::metadata(&file.destination)
                .await
                .map_err(|e| failed(&file.destination, format!("is missing: {e}")))?;
            let original = tokio::fs::metadata(&file.source)
                .await
                .map_err(|e| failed(&file.source, format!("cannot be read back: {e}")))?;
            if written.len() != original.len() {
                return Err(failed(
                    &file.destination,
                    format!("has {} bytes, expected {}", written.len(), original.len()),
                ));
            }
        }
        status!(self.status, "Verified {} copied file(s) from {label}", copied.len());
        Ok(())
    }

    // -- CLEAR -----------------------------------------------------------------

    async fn clear_sources(
        &self,
        label: &str,
        mount_point: &Path,
        profile: &IngestionProfile,
    ) -> Result<(), IngestError> {
        for dir in &profile.source_dirs {
            let source_dir = mount_point.join(dir);
            if !exists(&source_dir).await {
                continue;
            }
            self.host
                .clear_dir(&source_dir)
                .await
                .map_err(|e| IngestError::at_stage(label, Stage::Clear, e.into()))?;
            status!(self.status, "Cleared directory {dir} on SD card: {label}");
        }
        tokio::time::sleep(self.options.settle).await;
        Ok(())
    }

    // -- EJECT -----------------------------------------------------------------

    async fn eject(&self, label: &str, mount_point: &Path) -> Result<(), IngestError> {
        if !self.host.is_mounted(mount_point).await {
            status!(self.status, "Device {label} is not mounted. Skipping unmount.");
            return Ok(());
        }
        self.host
            .unmount(mount_point)
            .await
            .map_err(|e| IngestError::at_stage(label, Stage::Eject, e.into()))?;
        status!(self.status, "Successfully unmounted device {label}");
        Ok(())
    }
}
