//! The seams between the pipeline and the machine it runs on.
//!
//! [`DeviceHost`] covers everything the lifecycle does to a removable device
//! (enumerate, mount, copy, clear, unmount); [`Transcoder`] produces proxies.
//! The system implementations shell out through [`Invocation`]; the test
//! harnesses swap in a recording fake.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use offload_core::config::{Settings, TimeoutSettings, TranscoderSettings};
use offload_core::ProcessError;
use tokio_util::sync::CancellationToken;

use crate::process::Invocation;

#[async_trait]
pub trait DeviceHost: Send + Sync {
    /// Labels of every labelled block device currently attached.
    async fn connected_labels(&self) -> io::Result<Vec<String>>;

    /// Whether a filesystem is mounted at `mount_point` (an empty directory
    /// does not count).
    async fn is_mounted(&self, mount_point: &Path) -> bool;

    async fn mount(&self, label: &str, mount_point: &Path) -> Result<(), ProcessError>;

    async fn unmount(&self, mount_point: &Path) -> Result<(), ProcessError>;

    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<(), ProcessError>;

    /// Delete everything below `dir`, keeping `dir` itself.
    async fn clear_dir(&self, dir: &Path) -> Result<(), ProcessError>;
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Write a reduced-size rendition of `source` to `proxy`.
    async fn transcode(&self, source: &Path, proxy: &Path) -> Result<(), ProcessError>;
}

// ---------------------------------------------------------------------------
// System implementations
// ---------------------------------------------------------------------------

/// [`DeviceHost`] backed by the standard Linux utilities.
#[derive(Debug, Clone)]
pub struct SystemHost {
    label_dir: PathBuf,
    timeouts: TimeoutSettings,
    cancel: CancellationToken,
}

impl SystemHost {
    pub fn new(settings: &Settings, cancel: CancellationToken) -> Self {
        Self {
            label_dir: settings.engine.label_dir.clone(),
            timeouts: settings.timeouts.clone(),
            cancel,
        }
    }
}

#[async_trait]
impl DeviceHost for SystemHost {
    async fn connected_labels(&self) -> io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.label_dir).await?;
        let mut labels = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            labels.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(labels)
    }

    async fn is_mounted(&self, mount_point: &Path) -> bool {
        let probe = Invocation::new("mountpoint")
            .arg("-q")
            .arg(mount_point)
            .timeout(self.timeouts.mount())
            .probe(&self.cancel)
            .await;
        match probe {
            Ok(mounted) => mounted,
            Err(e) => {
                tracing::warn!(mount_point = %mount_point.display(), error = %e, "mount probe failed");
                false
            }
        }
    }

    async fn mount(&self, label: &str, mount_point: &Path) -> Result<(), ProcessError> {
        Invocation::new("mount")
            .arg(self.label_dir.join(label))
            .arg(mount_point)
            .timeout(self.timeouts.mount())
            .run(&self.cancel)
            .await
            .map(drop)
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), ProcessError> {
        Invocation::new("umount")
            .arg(mount_point)
            .timeout(self.timeouts.unmount())
            .run(&self.cancel)
            .await
            .map(drop)
    }

    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<(), ProcessError> {
        Invocation::new("cp")
            .arg(source)
            .arg(destination)
            .timeout(self.timeouts.copy())
            .run(&self.cancel)
            .await
            .map(drop)
    }

    async fn clear_dir(&self, dir: &Path) -> Result<(), ProcessError> {
        Invocation::new("find")
            .arg(dir)
            .args(["-mindepth", "1", "-delete"])
            .timeout(self.timeouts.clear())
            .run(&self.cancel)
            .await
            .map(drop)
    }
}

/// [`Transcoder`] that runs ffmpeg: H.264 video capped at `max_height`, AAC
/// audio.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    settings: TranscoderSettings,
    timeout: std::time::Duration,
    cancel: CancellationToken,
}

impl Ffmpeg {
    pub fn new(settings: &Settings, cancel: CancellationToken) -> Self {
        Self {
            settings: settings.transcoder.clone(),
            timeout: settings.timeouts.transcode(),
            cancel,
        }
    }

    fn invocation(&self, source: &Path, proxy: &Path) -> Invocation {
        let s = &self.settings;
        Invocation::new(s.program.as_str())
            .arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-vf")
            .arg(format!("scale=-2:{}", s.max_height))
            .args(["-c:v", "libx264", "-preset"])
            .arg(&s.preset)
            .arg("-crf")
            .arg(s.crf.to_string())
            .args(["-c:a", "aac", "-b:a"])
            .arg(&s.audio_bitrate)
            .arg(proxy)
            .timeout(self.timeout)
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn transcode(&self, source: &Path, proxy: &Path) -> Result<(), ProcessError> {
        self.invocation(source, proxy)
            .run(&self.cancel)
            .await
            .map(drop)
    }
}
