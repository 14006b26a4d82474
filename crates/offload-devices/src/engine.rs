//! The discovery loop.
//!
//! [`Engine::tick`] is one poll: enumerate attached devices, reconcile the
//! ledger, report removals, and dispatch one supervised lifecycle task per
//! newly seen label. [`Engine::run`] repeats that on the poll interval until
//! cancelled, then waits for every outstanding task.
//!
//! [`EngineHandle`] is the cloneable view the outer surfaces use: status for
//! diagnostics and on-demand proxy regeneration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use offload_core::{status, Broadcaster, ConfigError, ProfileStore, Stage};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::discovery::{self, PollOutcome};
use crate::ledger::DedupLedger;
use crate::lifecycle::{Pipeline, ProxySummary, StageBoard};
use crate::supervisor::Supervisor;

pub struct Engine {
    pipeline: Pipeline,
    profiles: Arc<ProfileStore>,
    ledger: Arc<DedupLedger>,
    supervisor: Supervisor,
    poll_interval: Duration,
}

impl Engine {
    pub fn new(pipeline: Pipeline, profiles: Arc<ProfileStore>, poll_interval: Duration) -> Self {
        let supervisor = Supervisor::new(pipeline.status().clone(), pipeline.board().clone());
        Self {
            pipeline,
            profiles,
            ledger: Arc::new(DedupLedger::new()),
            supervisor,
            poll_interval,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            pipeline: self.pipeline.clone(),
            profiles: self.profiles.clone(),
            ledger: self.ledger.clone(),
        }
    }

    pub fn ledger(&self) -> &Arc<DedupLedger> {
        &self.ledger
    }

    /// Lifecycle tasks not yet reaped.
    pub fn active(&self) -> usize {
        self.supervisor.active()
    }

    /// One discovery poll.
    pub async fn tick(&mut self) -> PollOutcome {
        self.supervisor.reap();
        let snapshot = self.profiles.snapshot();
        let status = self.pipeline.status();
        let board = self.pipeline.board();

        let connected = match discovery::enumerate(self.pipeline.host().as_ref()).await {
            Ok(connected) => connected,
            Err(e) => {
                tracing::warn!(error = %e, "device enumeration failed, skipping poll");
                return PollOutcome::default();
            }
        };

        let outcome = discovery::reconcile(&self.ledger, &connected, |label| snapshot.is_known(label));
        for label in &outcome.removed {
            board.remove(label);
            status!(status, "Removed {label} from processed devices");
        }
        for label in &outcome.dispatch {
            status!(status, "Detected new device: {label}");
            board.set(label, Stage::Discovered);

            let pipeline = self.pipeline.clone();
            let snapshot = snapshot.clone();
            let owned = label.clone();
            self.supervisor
                .spawn(label.clone(), async move { pipeline.process(&owned, snapshot).await });
        }
        outcome
    }

    /// Poll until `cancel` fires, then join every outstanding task.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.poll_interval, "discovery loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        let outstanding = self.supervisor.active();
        if outstanding > 0 {
            status!(
                self.pipeline.status(),
                "Shutting down, waiting for {outstanding} device task(s)"
            );
        }
        self.supervisor.join_all().await;
        tracing::info!("discovery loop stopped");
    }

    /// Wait for every outstanding task without stopping the loop.
    pub async fn join_all(&mut self) {
        self.supervisor.join_all().await;
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    pub label: String,
    pub name: String,
    pub destination: PathBuf,
}

/// Point-in-time diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub processing: Vec<String>,
    pub stages: BTreeMap<String, Stage>,
    pub profiles: Vec<ProfileSummary>,
    pub timezone: String,
    pub destination: String,
    pub observers: usize,
}

#[derive(Debug, Clone)]
pub struct EngineHandle {
    pipeline: Pipeline,
    profiles: Arc<ProfileStore>,
    ledger: Arc<DedupLedger>,
}

impl EngineHandle {
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        self.pipeline.status()
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn ledger(&self) -> &Arc<DedupLedger> {
        &self.ledger
    }

    pub fn board(&self) -> &Arc<StageBoard> {
        self.pipeline.board()
    }

    pub fn report(&self) -> StatusReport {
        let snapshot = self.profiles.snapshot();
        StatusReport {
            processing: self.ledger.labels(),
            stages: self.board().entries(),
            profiles: snapshot
                .profiles()
                .map(|(label, p)| ProfileSummary {
                    label: label.to_string(),
                    name: p.name.clone(),
                    destination: p.destination.clone(),
                })
                .collect(),
            timezone: snapshot.timezone().name().to_string(),
            destination: snapshot.destination().kind.to_string(),
            observers: self.broadcaster().observer_count(),
        }
    }

    /// Regenerate missing proxies for one profile's destination, or for all
    /// of them. Nothing is copied or cleared.
    pub async fn reprocess(&self, label: Option<&str>) -> Result<Vec<(String, ProxySummary)>, ConfigError> {
        let snapshot = self.profiles.snapshot();
        let targets: Vec<(String, PathBuf)> = match label {
            Some(label) => {
                let profile = snapshot
                    .profile(label)
                    .ok_or_else(|| ConfigError::UnknownLabel(label.to_string()))?;
                vec![(label.to_string(), profile.destination.clone())]
            }
            None => snapshot
                .profiles()
                .map(|(label, p)| (label.to_string(), p.destination.clone()))
                .collect(),
        };

        let status = self.broadcaster();
        let mut results = Vec::with_capacity(targets.len());
        for (label, destination) in targets {
            status!(status, "Reprocessing proxies for {label} in {}", destination.display());
            let summary = self.pipeline.create_proxies(&destination).await;
            status!(
                status,
                "Finished reprocessing {label}: {} created, {} already present, {} failed",
                summary.created,
                summary.existing,
                summary.failed
            );
            results.push((label, summary));
        }
        Ok(results)
    }
}
