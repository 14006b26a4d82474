//! Device discovery: which devices are attached right now, and what that
//! means for the ledger.
//!
//! Removal is decided against every attached label, profiled or not. Only
//! physical removal re-arms a label; a reload that drops and later restores
//! a profile must not free the label while its task is still running.

use std::collections::BTreeSet;
use std::io;

use crate::host::DeviceHost;
use crate::ledger::DedupLedger;

/// What one poll decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Newly seen labels, now in the ledger, each owed one lifecycle task.
    pub dispatch: Vec<String>,
    /// Labels dropped from the ledger because the device is gone.
    pub removed: Vec<String>,
}

/// Every attached label.
///
/// A missing label namespace means nothing labelled is attached.
pub async fn enumerate(host: &dyn DeviceHost) -> io::Result<BTreeSet<String>> {
    match host.connected_labels().await {
        Ok(labels) => Ok(labels.into_iter().collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(e),
    }
}

/// Bring the ledger in line with the `connected` device set. Labels leave
/// the ledger only when they are no longer connected; only labels accepted
/// by `known` are dispatched.
pub fn reconcile(
    ledger: &DedupLedger,
    connected: &BTreeSet<String>,
    known: impl Fn(&str) -> bool,
) -> PollOutcome {
    let removed = ledger
        .labels()
        .into_iter()
        .filter(|label| !connected.contains(label))
        .filter(|label| ledger.clear_processed(label))
        .collect();

    let dispatch = connected
        .iter()
        .filter(|label| known(label.as_str()))
        .filter(|label| ledger.mark_processing(label))
        .cloned()
        .collect();

    PollOutcome { dispatch, removed }
}
