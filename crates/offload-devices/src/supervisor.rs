//! Task supervision for lifecycle runs.
//!
//! Each dispatched label runs in its own task inside a [`JoinSet`]. The task
//! body is wrapped in `catch_unwind`, so a panic becomes an ordinary
//! [`IngestError::RuntimeFault`] result instead of tearing anything down.
//! The supervisor, not the pipeline, turns every result into the final status
//! line and the terminal stage on the board.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use offload_core::{status, Broadcaster, IngestError, Stage};
use tokio::task::JoinSet;

use crate::lifecycle::{Outcome, StageBoard};

pub struct Supervisor {
    tasks: JoinSet<()>,
    status: Arc<Broadcaster>,
    board: Arc<StageBoard>,
}

impl Supervisor {
    pub fn new(status: Arc<Broadcaster>, board: Arc<StageBoard>) -> Self {
        Self {
            tasks: JoinSet::new(),
            status,
            board,
        }
    }

    /// Run `run` for `label` as an isolated task.
    pub fn spawn<F>(&mut self, label: String, run: F)
    where
        F: Future<Output = Result<Outcome, IngestError>> + Send + 'static,
    {
        let status = self.status.clone();
        let board = self.board.clone();
        self.tasks.spawn(async move {
            status!(status, "Processing SD card: {label}");
            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    status!(
                        status,
                        "Recovered from panic while processing device {label}: {message}"
                    );
                    Err(IngestError::RuntimeFault {
                        label: label.clone(),
                        message,
                    })
                }
            };
            finish(&status, &board, &label, result);
        });
    }

    /// Collect tasks that already finished, without waiting.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "lifecycle task did not complete");
            }
            reaped += 1;
        }
        reaped
    }

    /// Wait for every outstanding task.
    pub async fn join_all(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "lifecycle task did not complete");
            }
        }
    }

    /// Tasks spawned and not yet reaped.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }
}

fn finish(status: &Broadcaster, board: &StageBoard, label: &str, result: Result<Outcome, IngestError>) {
    match result {
        Ok(outcome) => {
            board.set(label, Stage::Done);
            tracing::debug!(label, copied = outcome.copied.len(), cleared = outcome.cleared, "lifecycle done");
            status!(status, "Finished processing SD card: {label}");
        }
        Err(e) => {
            board.set(label, Stage::Failed);
            tracing::error!(label, kind = ?e.kind(), error = %e, "lifecycle failed");
            status!(status, "Error processing device {label}: {e}");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
