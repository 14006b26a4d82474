//! offload: unattended removable-media ingestion.
//!
//! Plug in a recognised SD card and offload mounts it, copies its media to the
//! archive, builds viewing proxies, verifies the copy, clears the card and
//! ejects it. Any number of cards can be processed at once.
//!
//! # Architecture
//!
//! ```text
//! config.json ──► ProfileStore ──► Engine ──► lifecycle tasks
//!      ▲                             │              │
//!   reload                           └──► Broadcaster ◄──┘
//!                                              │
//!                                       /ws/logs observers
//! ```
//!
//! The library crates do the work; this crate exposes the startup wiring and
//! the HTTP surface so the integration harnesses can drive them in-process.

pub mod api;
pub mod app;
pub mod reload;

pub use app::App;
