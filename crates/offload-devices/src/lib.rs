//! Device lifecycle engine for offload.
//!
//! Discovers labelled removable devices, deduplicates them against the
//! [`DedupLedger`], and drives each new one through the [`Pipeline`] inside a
//! supervised task. Everything that touches the machine goes through the
//! [`DeviceHost`] and [`Transcoder`] traits.

pub mod archive;
pub mod discovery;
pub mod engine;
pub mod host;
pub mod ledger;
pub mod lifecycle;
pub mod process;
pub mod supervisor;

pub use archive::{remove_clip_pair, ArchiveError};
pub use discovery::PollOutcome;
pub use engine::{Engine, EngineHandle, StatusReport};
pub use host::{DeviceHost, Ffmpeg, SystemHost, Transcoder};
pub use ledger::DedupLedger;
pub use lifecycle::{CopiedFile, Outcome, Pipeline, PipelineOptions, ProxySummary, StageBoard};
pub use process::Invocation;
pub use supervisor::Supervisor;
