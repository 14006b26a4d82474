//! Shared building blocks for the offload daemon.
//!
//! This crate holds everything the device pipeline and the outer surfaces
//! both need: the profile types, the runtime settings loader, the ingest
//! configuration document with its atomically swapped [`ProfileStore`], the
//! error taxonomy, and the status [`Broadcaster`].
//!
//! # Architecture
//!
//! ```text
//! ProfileStore ──► Engine (offload-devices) ──► Broadcaster ──► observers
//!                        │                          ▲
//!                        └──── lifecycle tasks ─────┘
//! ```
//!
//! The broadcaster depends on nothing; the profile store depends on nothing;
//! the engine consumes both.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod profile;
pub mod types;

pub use broadcast::{Broadcaster, Observer, ObserverGone, ObserverId, HISTORY_CAPACITY, OBSERVER_BUFFER};
pub use config::Settings;
pub use error::{ConfigError, ErrorKind, Failure, IngestError, ProcessError};
pub use profile::{IngestConfig, ProfileStore, Snapshot};
pub use types::{DestinationConfig, DestinationKind, IngestionProfile, LogEntry, Stage, PROXY_DIR};

/// Publish a formatted status line on a [`Broadcaster`].
///
/// ```rust,ignore
/// status!(broadcaster, "Detected new device: {}", label);
/// ```
#[macro_export]
macro_rules! status {
    ($broadcaster:expr, $($arg:tt)*) => {
        $broadcaster.publish(format!($($arg)*))
    };
}
