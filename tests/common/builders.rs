//! Test builders: ingest documents, profiles, and a ready-to-run [`Rig`].
//!
//! Like every helper under `common/`, these panic on bad input instead of
//! returning `Result`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use offload_core::{
    Broadcaster, DestinationConfig, DestinationKind, IngestConfig, IngestionProfile, ProfileStore,
    Snapshot,
};
use offload_devices::{Engine, Pipeline, PipelineOptions};
use tokio::sync::mpsc;

use super::fake_host::FakeHost;

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for an [`IngestConfig`].
///
/// ```rust
/// let doc = ConfigBuilder::new()
///     .profile("CARD1", &["DCIM"], "/archive/trip1")
///     .ignore(".thm")
///     .build();
/// ```
pub struct ConfigBuilder {
    doc: IngestConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            doc: IngestConfig {
                mappings: BTreeMap::new(),
                ignored_extensions: Vec::new(),
                timezone: "UTC".to_string(),
                destination_config: DestinationConfig {
                    kind: DestinationKind::Local,
                    path: PathBuf::new(),
                },
            },
        }
    }

    pub fn profile(mut self, label: &str, source_dirs: &[&str], destination: impl AsRef<Path>) -> Self {
        self.doc.mappings.insert(
            label.to_string(),
            IngestionProfile {
                name: format!("{label} camera"),
                source_dirs: source_dirs.iter().map(|s| s.to_string()).collect(),
                destination: destination.as_ref().to_path_buf(),
            },
        );
        self
    }

    /// Replace the source directories of an already added profile.
    pub fn sources(mut self, label: &str, source_dirs: &[&str]) -> Self {
        let profile = self.doc.mappings.get_mut(label).expect("profile added first");
        profile.source_dirs = source_dirs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn ignore(mut self, ext: &str) -> Self {
        self.doc.ignored_extensions.push(ext.to_string());
        self
    }

    pub fn timezone(mut self, tz: &str) -> Self {
        self.doc.timezone = tz.to_string();
        self
    }

    pub fn archive_root(mut self, path: impl AsRef<Path>) -> Self {
        self.doc.destination_config.path = path.as_ref().to_path_buf();
        self
    }

    pub fn build(self) -> IngestConfig {
        self.doc
    }

    pub fn snapshot(self) -> Snapshot {
        self.doc.validate().expect("test config must validate")
    }
}

// ---------------------------------------------------------------------------
// Rig
// ---------------------------------------------------------------------------

/// Room for every line a single harness test publishes.
const LOG_BUFFER: usize = 1 << 16;

/// A temp directory laid out as `mnt/<label>` (devices) and
/// `archive/<label>` (destinations), plus the shared pieces wired around a
/// [`FakeHost`].
pub struct Rig {
    pub dir: tempfile::TempDir,
    pub host: Arc<FakeHost>,
    pub status: Arc<Broadcaster>,
    pub profiles: Arc<ProfileStore>,
    pub options: PipelineOptions,
    log: Mutex<(mpsc::Receiver<String>, Vec<String>)>,
}

impl Rig {
    /// One profile per label, each reading `DCIM`, ignoring `.thm`.
    pub fn new(labels: &[&str]) -> Self {
        Self::with_config(labels, |c| c)
    }

    pub fn with_config(labels: &[&str], tweak: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive");
        let mut builder = ConfigBuilder::new().ignore(".thm").archive_root(&archive);
        for label in labels {
            builder = builder.profile(label, &["DCIM"], archive.join(label));
        }
        let snapshot = tweak(builder).snapshot();

        let options = PipelineOptions {
            mount_base: dir.path().join("mnt"),
            settle: Duration::ZERO,
            native_clip_extension: ".insv".to_string(),
            playback_extension: ".mp4".to_string(),
            proxy_extensions: vec![".mp4".to_string()],
        };

        let status = Arc::new(Broadcaster::new(snapshot.timezone()));
        let (_, rx) = status.subscribe_with_buffer(LOG_BUFFER).unwrap();

        Self {
            host: Arc::new(FakeHost::new()),
            status,
            profiles: Arc::new(ProfileStore::new(snapshot)),
            options,
            log: Mutex::new((rx, Vec::new())),
            dir,
        }
    }

    pub fn mount_point(&self, label: &str) -> PathBuf {
        self.options.mount_point(label)
    }

    pub fn destination(&self, label: &str) -> PathBuf {
        self.profiles
            .snapshot()
            .profile(label)
            .expect("label has a profile")
            .destination
            .clone()
    }

    pub fn proxy(&self, label: &str, name: &str) -> PathBuf {
        self.destination(label).join("Proxy").join(name)
    }

    /// Put a file on the device at `<mount>/<rel>`.
    pub fn put(&self, label: &str, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = self.mount_point(label).join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Put a file straight into the archive destination.
    pub fn archive(&self, label: &str, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.destination(label).join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Insert a device: files must already be placed with [`Rig::put`].
    pub fn insert(&self, label: &str) {
        std::fs::create_dir_all(self.mount_point(label)).unwrap();
        self.host.connect(label);
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.host.clone(),
            self.host.clone(),
            self.status.clone(),
            self.options.clone(),
        )
    }

    pub fn engine(&self) -> Engine {
        Engine::new(self.pipeline(), self.profiles.clone(), Duration::from_millis(10))
    }

    /// Every status message published since the rig was built, timestamps
    /// stripped. Unlike the broadcaster history this is unbounded.
    pub fn messages(&self) -> Vec<String> {
        let mut log = self.log.lock().unwrap();
        let (rx, seen) = &mut *log;
        while let Ok(line) = rx.try_recv() {
            let message = line.split_once("] ").map(|(_, m)| m).unwrap_or(&line);
            seen.push(message.to_string());
        }
        seen.clone()
    }
}
