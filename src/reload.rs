//! Hot reload of the ingest document.
//!
//! The parent directory is watched rather than the file, because saving
//! replaces the file by rename. Events for the document are debounced, then
//! [`apply_reload`] swaps the snapshot. Running lifecycle tasks keep the
//! snapshot they started with.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use offload_core::{status, Broadcaster, ProfileStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Quiet period after the last change before reloading.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Reload `path` into `profiles`. On failure the previous snapshot stays.
pub fn apply_reload(path: &Path, profiles: &ProfileStore, status: &Broadcaster) -> bool {
    match profiles.reload(path) {
        Ok(snapshot) => {
            status.set_timezone(snapshot.timezone());
            status!(
                status,
                "Configuration reloaded: {} device profile(s)",
                snapshot.len()
            );
            true
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config reload rejected");
            status!(status, "Configuration reload failed, keeping previous settings: {e}");
            false
        }
    }
}

/// Start watching `path`. The returned task ends when `cancel` fires.
pub fn spawn(
    path: PathBuf,
    profiles: Arc<ProfileStore>,
    status: Arc<Broadcaster>,
    cancel: CancellationToken,
) -> notify::Result<JoinHandle<()>> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().map(|n| n.to_os_string());

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_)
                ) && event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if relevant {
                    let _ = tx.send(());
                }
            }
            Err(e) => tracing::warn!(error = %e, "config watcher error"),
        })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(path = %path.display(), "watching config for changes");

    Ok(tokio::spawn(async move {
        let _watcher = watcher;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.recv() => {
                    if changed.is_none() {
                        break;
                    }
                    tokio::time::sleep(DEBOUNCE).await;
                    while rx.try_recv().is_ok() {}
                    apply_reload(&path, &profiles, &status);
                }
            }
        }
    }))
}
