use std::path::PathBuf;

use clap::{Parser, Subcommand};
use offload::App;
use offload_core::{IngestConfig, Settings};

#[derive(Parser)]
#[command(name = "offload", about = "Unattended SD card ingestion: copy, proxy, verify, clear, eject")]
struct Cli {
    /// Ingest document (device profiles, ignored extensions, time zone).
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,

    /// Optional TOML file overriding the built-in runtime settings.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Watch for devices and serve the status API (default).
    Run,
    /// Validate both configuration sources and print a summary.
    Check,
    /// Build missing proxies for one profile (or all) and exit.
    Reprocess {
        #[arg(long)]
        label: Option<String>,
    },
}

fn init_tracing(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("offload=info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

fn check(cli: &Cli) -> anyhow::Result<()> {
    let settings = Settings::load(cli.settings.as_deref())?;
    let snapshot = IngestConfig::load(&cli.config)?.validate()?;

    println!("settings: ok (mount base {})", settings.engine.mount_base.display());
    println!(
        "ingest config: ok ({} profile(s), timezone {}, destination {})",
        snapshot.len(),
        snapshot.timezone().name(),
        snapshot.destination().kind
    );
    for (label, profile) in snapshot.profiles() {
        println!(
            "  {label}: {} [{}] -> {}",
            profile.name,
            profile.source_dirs.join(", "),
            profile.destination.display()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_ref())?;

    match cli.command.as_ref().unwrap_or(&Command::Run) {
        Command::Check => check(&cli),
        Command::Reprocess { label } => {
            let app = App::load(&cli.config, cli.settings.as_deref())?;
            for (label, summary) in app.reprocess(label.as_deref()).await? {
                println!(
                    "{label}: {} created, {} existing, {} unsupported, {} failed",
                    summary.created, summary.existing, summary.unsupported, summary.failed
                );
            }
            Ok(())
        }
        Command::Run => {
            let app = App::load(&cli.config, cli.settings.as_deref())?;
            let cancel = app.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, shutting down");
                    cancel.cancel();
                }
            });
            app.run().await
        }
    }
}
