//! Removing an archived clip together with its proxy.
//!
//! The pair goes as a unit. The original is first renamed to a staging name
//! beside itself, then the proxy is removed, then the staged original is
//! deleted. If the proxy cannot be removed the staged original is renamed
//! back, leaving both files exactly as they were.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("{} does not exist or is not a file", .0.display())]
    Missing(PathBuf),

    #[error("failed to stage {} for removal: {source}", path.display())]
    Stage { path: PathBuf, source: io::Error },

    #[error("failed to remove proxy {}: {source}; original restored", path.display())]
    RemoveProxy { path: PathBuf, source: io::Error },

    #[error(
        "failed to remove proxy {}: {cause}; restoring original from {} also failed: {source}",
        proxy.display(),
        staged.display()
    )]
    Rollback {
        proxy: PathBuf,
        staged: PathBuf,
        cause: io::Error,
        source: io::Error,
    },

    #[error("proxy removed but staged original {} could not be deleted: {source}", path.display())]
    Finalize { path: PathBuf, source: io::Error },
}

/// Where `original` waits while its proxy is removed.
pub fn staging_path(original: &Path) -> PathBuf {
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    original.with_file_name(format!(".{name}.removing"))
}

/// Remove `original` and `proxy` together, or neither.
pub async fn remove_clip_pair(original: &Path, proxy: &Path) -> Result<(), ArchiveError> {
    remove_pair_with(original, proxy, |p| async move { tokio::fs::remove_file(p).await }).await
}

async fn remove_pair_with<F, Fut>(
    original: &Path,
    proxy: &Path,
    remove_proxy: F,
) -> Result<(), ArchiveError>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    for path in [original, proxy] {
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ArchiveError::Missing(path.to_path_buf()));
        }
    }

    let staged = staging_path(original);
    tokio::fs::rename(original, &staged)
        .await
        .map_err(|source| ArchiveError::Stage {
            path: original.to_path_buf(),
            source,
        })?;

    if let Err(cause) = remove_proxy(proxy.to_path_buf()).await {
        return match tokio::fs::rename(&staged, original).await {
            Ok(()) => Err(ArchiveError::RemoveProxy {
                path: proxy.to_path_buf(),
                source: cause,
            }),
            Err(source) => Err(ArchiveError::Rollback {
                proxy: proxy.to_path_buf(),
                staged,
                cause,
                source,
            }),
        };
    }

    tokio::fs::remove_file(&staged)
        .await
        .map_err(|source| ArchiveError::Finalize {
            path: staged.clone(),
            source,
        })?;
    tracing::info!(original = %original.display(), proxy = %proxy.display(), "removed clip pair");
    Ok(())
}
