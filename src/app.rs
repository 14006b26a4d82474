//! Startup wiring: load both configuration sources, build the shared pieces,
//! and run the engine, the config watcher and the HTTP surface together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use offload_core::{status, Broadcaster, ProfileStore, Settings};
use offload_devices::{
    DeviceHost, Engine, Ffmpeg, Pipeline, PipelineOptions, ProxySummary, SystemHost, Transcoder,
};
use tokio_util::sync::CancellationToken;

use crate::{api, reload};

pub struct App {
    pub settings: Settings,
    pub config_path: PathBuf,
    pub profiles: Arc<ProfileStore>,
    pub status: Arc<Broadcaster>,
    pub cancel: CancellationToken,
}

impl App {
    /// Load settings and the ingest document. Either failing is fatal.
    pub fn load(config_path: &Path, settings_path: Option<&Path>) -> anyhow::Result<Self> {
        let settings = Settings::load(settings_path).context("loading runtime settings")?;
        let profiles = ProfileStore::load(config_path)
            .with_context(|| format!("loading ingest config {}", config_path.display()))?;
        let status = Broadcaster::new(profiles.snapshot().timezone());

        Ok(Self {
            settings,
            config_path: config_path.to_path_buf(),
            profiles: Arc::new(profiles),
            status: Arc::new(status),
            cancel: CancellationToken::new(),
        })
    }

    pub fn pipeline_with(&self, host: Arc<dyn DeviceHost>, transcoder: Arc<dyn Transcoder>) -> Pipeline {
        Pipeline::new(
            host,
            transcoder,
            self.status.clone(),
            PipelineOptions::from_settings(&self.settings),
        )
    }

    /// Pipeline backed by the real system utilities and ffmpeg.
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(
            Arc::new(SystemHost::new(&self.settings, self.cancel.clone())),
            Arc::new(Ffmpeg::new(&self.settings, self.cancel.clone())),
        )
    }

    pub fn engine(&self, pipeline: Pipeline) -> Engine {
        Engine::new(
            pipeline,
            self.profiles.clone(),
            self.settings.engine.poll_interval(),
        )
    }

    /// Run until `cancel` fires or the server fails, then shut down cleanly.
    pub async fn run(self) -> anyhow::Result<()> {
        let engine = self.engine(self.pipeline());
        let handle = engine.handle();

        let watcher = reload::spawn(
            self.config_path.clone(),
            self.profiles.clone(),
            self.status.clone(),
            self.cancel.clone(),
        )
        .context("watching ingest config")?;

        let bind = &self.settings.server.bind;
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .with_context(|| format!("binding {bind}"))?;
        status!(self.status, "Server started on {bind}");

        let engine_task = tokio::spawn(engine.run(self.cancel.clone()));
        let served = axum::serve(listener, api::router(api::ApiState::new(handle)))
            .with_graceful_shutdown(self.cancel.clone().cancelled_owned())
            .await;

        self.cancel.cancel();
        engine_task.await.context("discovery loop panicked")?;
        watcher.await.context("config watcher panicked")?;
        tracing::info!("shutdown complete");
        served.context("http server failed")
    }

    /// Regenerate proxies once in the foreground.
    pub async fn reprocess(&self, label: Option<&str>) -> anyhow::Result<Vec<(String, ProxySummary)>> {
        let engine = self.engine(self.pipeline());
        Ok(engine.handle().reprocess(label).await?)
    }
}
