//! Error taxonomy.
//!
//! [`ConfigError`] covers both configuration sources and is fatal at
//! startup. [`ProcessError`] is one failed external command, with its output
//! kept verbatim. [`IngestError`] is what ends a device run; callers branch on
//! [`IngestError::kind`] rather than on message text.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::Stage;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Missing or invalid configuration. Fatal at startup; on reload the previous
/// snapshot stays in force.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Settings(#[from] ::config::ConfigError),

    #[error("failed to load timezone {0:?}")]
    Timezone(String),

    #[error("no profile configured for label {0}")]
    UnknownLabel(String),

    #[error("invalid profile {label}: {reason}")]
    Profile { label: String, reason: String },

    #[error("{0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// External processes
// ---------------------------------------------------------------------------

/// Failure of one external-process invocation (mount, cp, ffmpeg, …).
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// Non-zero exit. `output` is stdout followed by stderr, verbatim.
    #[error("`{program}` exited with {status}\nOutput: {output}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },

    #[error("`{program}` timed out after {after:?}")]
    TimedOut { program: String, after: Duration },

    #[error("`{program}` cancelled")]
    Cancelled { program: String },
}

/// The cause attached to a failed lifecycle step.
#[derive(Error, Debug)]
pub enum Failure {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("{0}")]
    Message(String),
}

impl Failure {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Failure::Io {
            context: context.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

/// Discriminant of [`IngestError`], for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Mount,
    Copy,
    Transcode,
    Verification,
    Clear,
    Timeout,
    RuntimeFault,
}

/// Everything that can end (or, for `Transcode`, blemish) one device's run.
///
/// All variants except `Transcode` are terminal for that device's pipeline
/// and never propagate past the task boundary.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Mount or unmount failure; `stage` tells which.
    #[error("{stage} failed for {label}: {failure}")]
    Mount {
        label: String,
        stage: Stage,
        failure: Failure,
    },

    #[error("copy failed for {label}: {failure}")]
    Copy { label: String, failure: Failure },

    /// Per-file proxy failure. Logged and skipped by the pipeline.
    #[error("failed to create proxy for {}: {failure}", path.display())]
    Transcode { path: PathBuf, failure: Failure },

    #[error("verification failed for {label}: {} {detail}", path.display())]
    Verification {
        label: String,
        path: PathBuf,
        detail: String,
    },

    #[error("clear failed for {label}: {failure}")]
    Clear { label: String, failure: Failure },

    #[error("{stage} timed out for {label} after {after:?}")]
    Timeout {
        label: String,
        stage: Stage,
        after: Duration,
    },

    #[error("task for {label} faulted: {message}")]
    RuntimeFault { label: String, message: String },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Configuration(_) => ErrorKind::Configuration,
            IngestError::Mount { .. } => ErrorKind::Mount,
            IngestError::Copy { .. } => ErrorKind::Copy,
            IngestError::Transcode { .. } => ErrorKind::Transcode,
            IngestError::Verification { .. } => ErrorKind::Verification,
            IngestError::Clear { .. } => ErrorKind::Clear,
            IngestError::Timeout { .. } => ErrorKind::Timeout,
            IngestError::RuntimeFault { .. } => ErrorKind::RuntimeFault,
        }
    }

    /// Build the error for a failed step, surfacing timeouts as their own kind.
    pub fn at_stage(label: &str, stage: Stage, failure: Failure) -> Self {
        if let Failure::Process(ProcessError::TimedOut { after, .. }) = &failure {
            return IngestError::Timeout {
                label: label.to_string(),
                stage,
                after: *after,
            };
        }
        let label = label.to_string();
        match stage {
            Stage::Copy => IngestError::Copy { label, failure },
            Stage::Clear => IngestError::Clear { label, failure },
            _ => IngestError::Mount {
                label,
                stage,
                failure,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_get_their_own_kind() {
        let failure = Failure::Process(ProcessError::TimedOut {
            program: "mount".into(),
            after: Duration::from_secs(60),
        });
        let err = IngestError::at_stage("CARD1", Stage::Mount, failure);
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn process_output_is_surfaced_verbatim() {
        let failure = Failure::Process(ProcessError::Failed {
            program: "cp".into(),
            status: "exit status: 1".into(),
            output: "cp: cannot stat 'x': No such file or directory".into(),
        });
        let err = IngestError::at_stage("CARD1", Stage::Copy, failure);
        assert_eq!(err.kind(), ErrorKind::Copy);
        assert!(err
            .to_string()
            .contains("cp: cannot stat 'x': No such file or directory"));
    }

    #[test]
    fn unmount_failures_are_mount_kind() {
        let err = IngestError::at_stage("CARD1", Stage::Eject, Failure::Message("busy".into()));
        assert_eq!(err.kind(), ErrorKind::Mount);
        assert_eq!(err.to_string(), "eject failed for CARD1: busy");
    }
}
