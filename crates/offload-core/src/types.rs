//! Core types for offload-core.
//!
//! This module defines the data structures shared across every layer: the
//! per-device [`IngestionProfile`], the destination descriptor, the lifecycle
//! [`Stage`], and the broadcast [`LogEntry`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sub-directory of every destination that receives transcoded proxies.
pub const PROXY_DIR: &str = "Proxy";

/// Timestamp layout used on every status line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Describes one recognised device: what to ingest from it and where to put it.
///
/// Immutable once loaded; a configuration reload replaces the whole
/// [`Snapshot`](crate::Snapshot) that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionProfile {
    /// Human-readable name ("Insta360 X3", "GoPro left", …).
    pub name: String,
    /// Source directories relative to the device's mount point, in order.
    #[serde(default)]
    pub source_dirs: Vec<String>,
    /// Directory the media files are copied into.
    pub destination: PathBuf,
}

impl IngestionProfile {
    /// Where proxies for this profile's destination are written.
    pub fn proxy_dir(&self) -> PathBuf {
        proxy_dir_for(&self.destination)
    }
}

/// The `Proxy/` directory for an arbitrary destination directory.
pub fn proxy_dir_for(destination: &Path) -> PathBuf {
    destination.join(PROXY_DIR)
}

/// How the archive root is reached. The engine never interprets this; it only
/// requires destinations to be reachable directories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    #[default]
    Local,
    Nfs,
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationKind::Local => write!(f, "local"),
            DestinationKind::Nfs => write!(f, "nfs"),
        }
    }
}

/// `destinationConfig` block of the ingest document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    #[serde(rename = "type")]
    pub kind: DestinationKind,
    #[serde(default)]
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Lifecycle stages
// ---------------------------------------------------------------------------

/// Position of one device in its lifecycle.
///
/// Stages only move forward: `Discovered → MountCheck → (Mount) → Copy →
/// (Transcode) → Verify → (Clear) → Eject → Done`, with `Failed` reachable
/// from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovered,
    MountCheck,
    Mount,
    Copy,
    Transcode,
    Verify,
    Clear,
    Eject,
    Done,
    Failed,
}

impl Stage {
    /// True for `Done` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Discovered => "discovered",
            Stage::MountCheck => "mount-check",
            Stage::Mount => "mount",
            Stage::Copy => "copy",
            Stage::Transcode => "transcode",
            Stage::Verify => "verify",
            Stage::Clear => "clear",
            Stage::Eject => "eject",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Status lines
// ---------------------------------------------------------------------------

/// A single broadcast status line, stamped in the configured time zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Publish order. Strictly increasing across the process lifetime.
    pub seq: u64,
    pub ts: chrono::DateTime<chrono_tz::Tz>,
    /// The unformatted message text.
    pub message: String,
    /// `[timestamp] message`, the exact text delivered to observers.
    pub line: String,
}

impl LogEntry {
    pub fn new(seq: u64, ts: chrono::DateTime<chrono_tz::Tz>, message: String) -> Self {
        let line = format!("[{}] {}", ts.format(TIMESTAMP_FORMAT), message);
        Self {
            seq,
            ts,
            message,
            line,
        }
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.line)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
