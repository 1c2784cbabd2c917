#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use dmrlink::config::{load_config, Args, LoggerConfig};
use dmrlink::metrics::{start_metrics_server, HealthState};
use dmrlink::report::{self, ReportHub};
use dmrlink::{run_with_shutdown, Relay};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    init_tracing(&args, &config.logger)?;

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let hub = ReportHub::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    if config.reports.enabled {
        let listener = TcpListener::bind(("0.0.0.0", config.reports.port)).await?;
        let reports = config.reports.clone();
        let hub = hub.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = report::run_with_shutdown(listener, reports, hub, shutdown_rx).await {
                warn!("reporting server error: {}", e);
            }
        });
    }

    let relay = Relay::bind(config, hub).await?;
    let health_state = HealthState::new();

    tokio::spawn({
        let health_state = health_state.clone();
        let addr = args.metrics_addr;
        async move {
            if let Err(e) = start_metrics_server(addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    health_state.set_systems(relay.router().endpoints().len());
    let mut core = tokio::spawn(run_with_shutdown(relay, shutdown_rx));

    tokio::select! {
        result = &mut core => {
            match result {
                Ok(Err(e)) => tracing::error!("server error: {}", e),
                Err(e) => tracing::error!("core task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            health_state.set_systems(0);
            let _ = shutdown_tx.send(());
            if let Ok(Err(e)) = core.await {
                tracing::error!("server error: {}", e);
            }
        }
    }

    Ok(())
}

fn init_tracing(args: &Args, logger: &LoggerConfig) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match args.verbose {
            0 => logger.level.as_str(),
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    let log_file = args.log_file.as_ref().or(logger.file.as_ref());
    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}
