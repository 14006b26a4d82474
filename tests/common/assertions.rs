//! Assertion helpers for offload harnesses.
//!
//! Failure messages print the whole status log, since that is the only
//! place the pipeline explains itself.

use std::path::Path;

/// Assert that some status message contains `needle`.
///
/// ```rust
/// assert_logged!(rig.messages(), "Detected new device: CARD1");
/// ```
#[macro_export]
macro_rules! assert_logged {
    ($messages:expr, $needle:expr) => {{
        let messages: Vec<String> = $messages;
        let needle: &str = $needle;
        if !messages.iter().any(|m| m.contains(needle)) {
            panic!(
                "assert_logged! failed: no status line contains {:?}\n  log:\n    {}",
                needle,
                messages.join("\n    ")
            );
        }
    }};
}

/// Assert that no status message contains `needle`.
#[macro_export]
macro_rules! assert_not_logged {
    ($messages:expr, $needle:expr) => {{
        let messages: Vec<String> = $messages;
        let needle: &str = $needle;
        if let Some(hit) = messages.iter().find(|m| m.contains(needle)) {
            panic!(
                "assert_not_logged! failed: {:?} matched {:?}\n  log:\n    {}",
                needle,
                hit,
                messages.join("\n    ")
            );
        }
    }};
}

/// Names of the entries directly in `dir`, sorted. Missing dir → empty.
pub fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Poll `cond` until it holds or a few seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
