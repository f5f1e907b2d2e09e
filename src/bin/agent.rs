//! Producer process: samples host telemetry and pushes it to the collector.

use std::sync::Arc;

use anyhow::{Context, Result as AnyhowResult};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vitals::agent::{Agent, Reporter, SystemSampler};
use vitals::config::{AgentArgs, AgentConfig};
use vitals::constants::VITALS_VERSION;
use vitals::logging::init_logging;
use vitals::server::shutdown_signal;

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let args = AgentArgs::parse();
    let config = AgentConfig::from_args(args).context("Failed to load agent configuration")?;

    init_logging(&config.logging).context("Failed to initialize logging")?;
    info!("vitals-agent v{}", VITALS_VERSION);

    let reporter = Reporter::new(&config.base_url(), config.signer())
        .context("Failed to build the HTTP reporter")?;
    let agent = Arc::new(Agent::new(&config, Arc::new(SystemSampler::new()), reporter));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Failed to install signal handlers");
        }
        trigger.cancel();
    });

    agent.run(cancel).await;
    Ok(())
}
