//! Collector process: Ingest API over the Metrics Store.

use anyhow::{Context, Result as AnyhowResult};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vitals::config::{ServerArgs, ServerConfig};
use vitals::constants::VITALS_VERSION;
use vitals::logging::init_logging;
use vitals::server;

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let args = ServerArgs::parse();
    let config = ServerConfig::from_args(args).context("Failed to load collector configuration")?;

    init_logging(&config.logging).context("Failed to initialize logging")?;
    info!("vitals-server v{}", VITALS_VERSION);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = server::shutdown_signal().await {
            error!(error = %e, "Failed to install signal handlers");
        }
        trigger.cancel();
    });

    if let Err(e) = server::run(config, shutdown).await {
        error!(
            category = e.category(),
            recoverable = e.is_recoverable(),
            error = %e,
            "Collector terminated"
        );
        return Err(e).context("Collector terminated with an error");
    }
    Ok(())
}
