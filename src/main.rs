// src/main.rs
//! Sentra Lab Message Bus
//!
//! Runs the perception/mapping simulation described by a configuration
//! file: `sentra-lab-bus <configuration.json>`.

use anyhow::{bail, Context as _, Result};
use sentra_lab_bus::agent::{AgentPool, AgentPoolConfig};
use sentra_lab_bus::bus::Broker;
use sentra_lab_bus::observability::{init_metrics, init_tracing};
use sentra_lab_bus::sim::messages::{Terminated, TIME_SERVICE};
use sentra_lab_bus::sim::Simulation;
use sentra_lab_bus::utils::config::BusConfig;
use sentra_lab_bus::utils::signal::shutdown_signal;
use sentra_lab_bus::BuildInfo;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let Some(config_path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        bail!("usage: sentra-lab-bus <configuration.json>");
    };

    // Load configuration, then initialize observability from it
    let config = BusConfig::load()?;
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    let build = BuildInfo::current();
    info!(
        "Starting Sentra Lab Message Bus v{} ({})",
        build.version, build.git_hash
    );

    let simulation = Simulation::load(&config_path, &config.simulation)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let broker = Arc::new(Broker::new());
    let mut pool = AgentPool::with_config(Arc::clone(&broker), AgentPoolConfig::from(&config));
    let run = simulation.start(&mut pool)?;
    let join_timeout = pool.join_timeout();

    let mut finished = tokio::task::spawn_blocking(move || pool.join_all());

    let report = tokio::select! {
        joined = &mut finished => joined?,
        _ = shutdown_signal() => {
            info!("Stopping the clock...");
            broker.send_notification(Terminated::from(TIME_SERVICE));
            match tokio::time::timeout(join_timeout, &mut finished).await {
                Ok(joined) => joined?,
                Err(_) => bail!("agents did not stop within {:?}", join_timeout),
            }
        }
    };

    let orphans = broker.purge_orphaned();
    if orphans > 0 {
        warn!("Dropped {} unanswered requests", orphans);
    }

    let summary = run.summarize(&report);
    info!(
        "Run {} finished in {} ms: {:?}",
        summary.run_id,
        summary.elapsed.num_milliseconds(),
        summary.statistics
    );

    if let Some(failure) = &summary.failure {
        warn!("{} failed: {}", failure.sensor, failure.description);
    }
    match &summary.report_path {
        Some(path) => info!("Report: {}", path.display()),
        None => warn!("No report was written"),
    }

    for outcome in report.failures() {
        if let Err(e) = &outcome.result {
            error!("Agent {} failed: {}", outcome.agent, e);
        }
    }
    if !summary.failed_agents.is_empty() {
        bail!("{} agents failed", summary.failed_agents.len());
    }

    Ok(())
}
