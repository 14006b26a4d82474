//! Runtime settings for offload.
//!
//! [`Settings::load`] layers the embedded defaults, an optional TOML file,
//! and `OFFLOAD__SECTION__KEY` environment variables. [`Settings::defaults`]
//! returns the embedded defaults without touching the filesystem (useful in
//! tests).
//!
//! These are the daemon's own tunables. The ingest document (device profiles,
//! ignored extensions, time zone) lives in [`crate::profile`].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_SETTINGS: &str = r#"
[engine]
mount_base            = "/media/videoserver"
label_dir             = "/dev/disk/by-label"
poll_interval_secs    = 5
settle_secs           = 2
native_clip_extension = ".insv"
playback_extension    = ".mp4"

[timeouts]
mount_secs     = 60
copy_secs      = 1800
transcode_secs = 7200
clear_secs     = 600
unmount_secs   = 60

[transcoder]
program       = "ffmpeg"
max_height    = 720
crf           = 23
preset        = "fast"
audio_bitrate = "128k"
extensions    = [".mp4"]

[server]
bind = "0.0.0.0:80"
"#;

const ENV_PREFIX: &str = "OFFLOAD";

// ---------------------------------------------------------------------------
// Public settings types
// ---------------------------------------------------------------------------

/// Top-level runtime settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineSettings,
    pub timeouts: TimeoutSettings,
    pub transcoder: TranscoderSettings,
    pub server: ServerSettings,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Mount points live at `<mount_base>/<label>`.
    pub mount_base: PathBuf,
    /// OS label namespace; each entry name is a device label.
    pub label_dir: PathBuf,
    pub poll_interval_secs: u64,
    /// Pause after CLEAR so deletions flush before eject.
    pub settle_secs: u64,
    /// Clip extension renamed on copy …
    pub native_clip_extension: String,
    /// … to this playback container extension.
    pub playback_extension: String,
}

impl EngineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// `[timeouts]` section. One bound per external-process step.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSettings {
    pub mount_secs: u64,
    pub copy_secs: u64,
    pub transcode_secs: u64,
    pub clear_secs: u64,
    pub unmount_secs: u64,
}

impl TimeoutSettings {
    pub fn mount(&self) -> Duration {
        Duration::from_secs(self.mount_secs)
    }
    pub fn copy(&self) -> Duration {
        Duration::from_secs(self.copy_secs)
    }
    pub fn transcode(&self) -> Duration {
        Duration::from_secs(self.transcode_secs)
    }
    pub fn clear(&self) -> Duration {
        Duration::from_secs(self.clear_secs)
    }
    pub fn unmount(&self) -> Duration {
        Duration::from_secs(self.unmount_secs)
    }
}

/// `[transcoder]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderSettings {
    pub program: String,
    /// Proxies are scaled to this height, width following the aspect ratio.
    pub max_height: u32,
    pub crf: u8,
    pub preset: String,
    pub audio_bitrate: String,
    /// Container extensions eligible for proxy generation.
    pub extensions: Vec<String>,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Settings {
    /// Load the embedded defaults, then `path` (if given and present), then
    /// `OFFLOAD__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder().add_source(::config::File::from_str(
            DEFAULT_SETTINGS,
            ::config::FileFormat::Toml,
        ));
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        let settings: Self = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string layered over the defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let settings: Self = ::config::Config::builder()
            .add_source(::config::File::from_str(
                DEFAULT_SETTINGS,
                ::config::FileFormat::Toml,
            ))
            .add_source(::config::File::from_str(src, ::config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        ::config::Config::builder()
            .add_source(::config::File::from_str(
                DEFAULT_SETTINGS,
                ::config::FileFormat::Toml,
            ))
            .build()
            .expect("built-in default settings must be valid TOML")
            .try_deserialize()
            .expect("built-in default settings must deserialize correctly")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.mount_base.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("engine.mount_base must not be empty".into()));
        }
        if self.transcoder.program.trim().is_empty() {
            return Err(ConfigError::Invalid("transcoder.program must not be empty".into()));
        }
        for ext in [
            &self.engine.native_clip_extension,
            &self.engine.playback_extension,
        ] {
            if !ext.starts_with('.') {
                return Err(ConfigError::Invalid(format!(
                    "extension {ext:?} must start with '.'"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
