//! Dedup ledger: labels that already have a lifecycle task since their last
//! insertion.
//!
//! Membership is the only dispatch gate. [`DedupLedger::mark_processing`] is
//! an atomic test-and-insert, so two callers racing on the same label cannot
//! both win.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct DedupLedger {
    labels: Mutex<BTreeSet<String>>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.labels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `label` as processing. Returns `false` if it already was.
    pub fn mark_processing(&self, label: &str) -> bool {
        self.lock().insert(label.to_string())
    }

    /// Forget `label`, re-arming it for its next insertion.
    pub fn clear_processed(&self, label: &str) -> bool {
        self.lock().remove(label)
    }

    pub fn is_processing(&self, label: &str) -> bool {
        self.lock().contains(label)
    }

    /// Sorted copy of the current members.
    pub fn labels(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
