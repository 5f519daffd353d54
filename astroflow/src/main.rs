//! # astroflow
//!
//! Runs the reference pipeline on a timer and serves the latest result over
//! HTTP until interrupted.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use astroflow::config::AstroflowConfig;
use astroflow::events::LoggingEventSink;
use astroflow::http;
use astroflow::observability::init_tracing;
use astroflow::pipeline::PipelineRunner;
use astroflow::query::QueryService;
use astroflow::scheduler::Scheduler;
use astroflow::source::SyntheticObservationSource;
use astroflow::store::{self, ResultStore};

/// Scheduled observation pipeline server.
#[derive(Parser, Debug)]
#[command(name = "astroflow", about = "Scheduled observation pipeline server")]
struct Cli {
    /// JSON configuration file. `ASTROFLOW_*` variables are applied on top.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Seconds between scheduler ticks.
    #[arg(long)]
    tick_interval: Option<f64>,

    /// Seconds after a publish during which ticks are dropped.
    #[arg(long)]
    cooldown: Option<f64>,

    /// Watchdog for a whole run, in seconds.
    #[arg(long)]
    run_timeout: Option<f64>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind.
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. `info` or `astroflow=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,

    /// Do not render preview images.
    #[arg(long)]
    no_preview: bool,
}

impl Cli {
    fn load_config(&self) -> Result<AstroflowConfig> {
        let mut config = match &self.config {
            Some(path) => AstroflowConfig::from_file(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => AstroflowConfig::default(),
        };
        config
            .apply_env(|key| std::env::var(key).ok())
            .context("Invalid ASTROFLOW_* environment override")?;

        if let Some(v) = self.tick_interval {
            config.scheduler.tick_interval_seconds = v;
        }
        if let Some(v) = self.cooldown {
            config.scheduler.cooldown_seconds = v;
        }
        if let Some(v) = self.run_timeout {
            config.scheduler.run_timeout_seconds = Some(v);
        }
        if let Some(v) = &self.host {
            config.server.host.clone_from(v);
        }
        if let Some(v) = self.port {
            config.server.port = v;
        }
        if let Some(v) = &self.log_level {
            config.logging.level.clone_from(v);
        }
        if self.log_json {
            config.logging.json = true;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config.logging);

    let result_store = if cli.no_preview {
        ResultStore::without_preview()
    } else {
        ResultStore::new()
    };
    let store = store::init_global(result_store).context("Failed to install result store")?;
    let query = QueryService::global().context("Result store unavailable")?;

    let addr: SocketAddr = config
        .server
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind_addr()))?;

    let runner = PipelineRunner::reference(&config).context("Invalid pipeline configuration")?;
    let scheduler = Scheduler::new(
        runner,
        Arc::new(SyntheticObservationSource::new()),
        Arc::clone(&store),
        &config.scheduler,
    )
    .context("Invalid scheduler configuration")?
    .with_event_sink(Arc::new(LoggingEventSink::default()));
    let handle = scheduler.start();

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for ctrl-c");
        }
        info!("Shutdown signal received");
    };
    http::serve(addr, query, shutdown)
        .await
        .context("HTTP server failed")?;

    let stats = handle
        .shutdown("process shutdown")
        .await
        .context("Scheduler did not stop cleanly")?;
    info!(
        runs = stats.runs_finished(),
        dropped_ticks = stats.dropped_ticks,
        "astroflow stopped"
    );
    Ok(())
}
