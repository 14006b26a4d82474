//! Ingest configuration document and the atomically swapped profile store.
//!
//! The document is the JSON file operators edit (or the HTTP layer writes):
//! device-label → profile mappings, ignored extensions, the time zone for
//! status lines, and the destination mode. [`IngestConfig::validate`] turns it
//! into an immutable [`Snapshot`]; [`ProfileStore`] hands out `Arc<Snapshot>`
//! so a lifecycle task keeps the snapshot it started with across reloads.

use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{DestinationConfig, IngestionProfile};

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// The ingest document as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestConfig {
    #[serde(rename = "sdCardMappings", default)]
    pub mappings: BTreeMap<String, IngestionProfile>,
    #[serde(default)]
    pub ignored_extensions: Vec<String>,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub destination_config: DestinationConfig,
}

impl IngestConfig {
    pub fn from_json(src: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(src)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&src)
    }

    /// Write the document as pretty JSON, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let body = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, body).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)
    }

    /// Check every invariant and build the snapshot the engine reads.
    pub fn validate(&self) -> Result<Snapshot, ConfigError> {
        if self.timezone.trim().is_empty() {
            return Err(ConfigError::Timezone(self.timezone.clone()));
        }
        let timezone: chrono_tz::Tz = self
            .timezone
            .parse()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))?;

        for (label, profile) in &self.mappings {
            validate_profile(label, profile)?;
        }

        let ignored = self
            .ignored_extensions
            .iter()
            .map(|ext| ext.trim().to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Ok(Snapshot {
            profiles: self.mappings.clone(),
            ignored,
            timezone,
            destination: self.destination_config.clone(),
        })
    }
}

fn validate_profile(label: &str, profile: &IngestionProfile) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::Profile {
        label: label.to_string(),
        reason,
    };

    if label.is_empty() || label.contains('/') {
        return Err(invalid("label must be a single path component".into()));
    }
    if profile.destination.as_os_str().is_empty() {
        return Err(invalid("destination must not be empty".into()));
    }
    // CLEAR deletes everything under these; they must stay inside the mount point.
    for dir in &profile.source_dirs {
        let path = Path::new(dir);
        let escapes = dir.is_empty()
            || path.is_absolute()
            || path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(invalid(format!(
                "source directory {dir:?} must be a relative path inside the device"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One validated, immutable view of the ingest configuration.
#[derive(Debug, Clone)]
pub struct Snapshot {
    profiles: BTreeMap<String, IngestionProfile>,
    /// Lower-cased suffixes.
    ignored: Vec<String>,
    timezone: chrono_tz::Tz,
    destination: DestinationConfig,
}

impl Snapshot {
    pub fn profile(&self, label: &str) -> Option<&IngestionProfile> {
        self.profiles.get(label)
    }

    pub fn is_known(&self, label: &str) -> bool {
        self.profiles.contains_key(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn profiles(&self) -> impl Iterator<Item = (&str, &IngestionProfile)> {
        self.profiles.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Case-insensitive suffix match against the ignored-extension list.
    pub fn should_ignore(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.ignored.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.timezone
    }

    pub fn destination(&self) -> &DestinationConfig {
        &self.destination
    }

    /// Whether `path` lies inside a profile destination or the archive root.
    pub fn owns_path(&self, path: &Path) -> bool {
        if !path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return false;
        }
        let archive_root = Some(self.destination.path.as_path()).filter(|p| !p.as_os_str().is_empty());
        self.profiles
            .values()
            .map(|p| p.destination.as_path())
            .chain(archive_root)
            .any(|root| path.starts_with(root) && path != root)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Holds the current [`Snapshot`]. Readers see either the old or the new
/// snapshot, never a mix.
#[derive(Debug)]
pub struct ProfileStore {
    current: RwLock<Arc<Snapshot>>,
}

impl ProfileStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Load and validate the document at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::new(IngestConfig::load(path)?.validate()?))
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in `snapshot`, returning the one it replaced.
    pub fn replace(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(snapshot))
    }

    /// Re-read `path`. On any error the current snapshot is left untouched.
    pub fn reload(&self, path: &Path) -> Result<Arc<Snapshot>, ConfigError> {
        let snapshot = IngestConfig::load(path)?.validate()?;
        self.replace(snapshot);
        Ok(self.snapshot())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DestinationKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const SAMPLE: &str = r#"{
        "sdCardMappings": {
            "CARD1": { "name": "CARD1", "sourceDirs": ["DCIM"], "destination": "/archive/trip1" }
        },
        "ignoredExtensions": [".THM", ".lrv"],
        "timezone": "Europe/Amsterdam",
        "destinationConfig": { "type": "nfs", "path": "/media/nfs/video_archive" }
    }"#;

    fn sample() -> Snapshot {
        IngestConfig::from_json(SAMPLE).unwrap().validate().unwrap()
    }

    #[test]
    fn sample_document_validates() {
        let snap = sample();
        assert!(snap.is_known("CARD1"));
        assert!(!snap.is_known("card1"));
        assert_eq!(snap.destination().kind, DestinationKind::Nfs);
        assert_eq!(snap.timezone(), chrono_tz::Europe::Amsterdam);
    }

    #[rstest]
    #[case("b.thm", true)]
    #[case("B.THM", true)]
    #[case("clip.LRV", true)]
    #[case("a.mp4", false)]
    #[case("thm", false)]
    fn ignored_extensions_match_case_insensitively(#[case] name: &str, #[case] ignored: bool) {
        assert_eq!(sample().should_ignore(name), ignored);
    }

    #[rstest]
    #[case("")]
    #[case("Mars/Olympus")]
    fn bad_timezone_is_rejected(#[case] tz: &str) {
        let mut doc = IngestConfig::from_json(SAMPLE).unwrap();
        doc.timezone = tz.to_string();
        assert!(matches!(doc.validate(), Err(ConfigError::Timezone(_))));
    }

    #[rstest]
    #[case("/DCIM")]
    #[case("../etc")]
    #[case("DCIM/../../x")]
    #[case("")]
    fn escaping_source_dirs_are_rejected(#[case] dir: &str) {
        let mut doc = IngestConfig::from_json(SAMPLE).unwrap();
        doc.mappings.get_mut("CARD1").unwrap().source_dirs = vec![dir.to_string()];
        assert!(matches!(doc.validate(), Err(ConfigError::Profile { .. })));
    }

    #[rstest]
    #[case("/archive/trip1/a.mp4", true)]
    #[case("/archive/trip1/Proxy/a.mp4", true)]
    #[case("/media/nfs/video_archive/other/b.mp4", true)]
    #[case("/archive/trip1", false)]
    #[case("/archive/trip1/../../etc/passwd", false)]
    #[case("/etc/passwd", false)]
    #[case("archive/trip1/a.mp4", false)]
    fn only_archive_paths_are_owned(#[case] path: &str, #[case] owned: bool) {
        assert_eq!(sample().owns_path(Path::new(path)), owned);
    }

    #[test]
    fn reload_keeps_old_snapshot_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let store = ProfileStore::load(&path).unwrap();
        let before = store.snapshot();

        std::fs::write(&path, "{ not json").unwrap();
        assert!(store.reload(&path).is_err());
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn reload_swaps_snapshot_and_in_flight_readers_keep_theirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let store = ProfileStore::load(&path).unwrap();
        let held = store.snapshot();

        let mut doc = IngestConfig::load(&path).unwrap();
        doc.mappings.remove("CARD1");
        doc.save(&path).unwrap();

        let fresh = store.reload(&path).unwrap();
        assert!(fresh.is_empty());
        assert!(held.is_known("CARD1"));
    }

    #[test]
    fn save_round_trips_original_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let doc = IngestConfig::from_json(SAMPLE).unwrap();
        doc.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["sdCardMappings"]["CARD1"]["sourceDirs"][0], "DCIM");
        assert_eq!(raw["destinationConfig"]["type"], "nfs");
        assert_eq!(IngestConfig::load(&path).unwrap(), doc);
    }
}
