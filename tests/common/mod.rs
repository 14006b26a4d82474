//! Shared test utilities for offload integration harnesses.
//!
//! Import everything via `mod common; use common::*;` at the top of each
//! harness file.

pub mod assertions;
pub mod builders;
pub mod fake_host;
pub mod fixtures;

pub use assertions::*;
pub use builders::*;
pub use fake_host::*;
pub use fixtures::*;
