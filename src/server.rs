// ============================================================================
// SECTION 11: SERVER RUNTIME
// ============================================================================
// Start-up order: bind, restore snapshot, connect mirror, spawn snapshot task,
// serve. A failed bind leaves no background task behind.
// Shutdown order: stop accepting, drain in-flight requests for at most the
// grace period, stop the snapshot task, final flush.
// ============================================================================

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{router, AppState};
use crate::config::ServerConfig;
use crate::constants::{MIRROR_POOL_SIZE, SHUTDOWN_GRACE_PERIOD, VITALS_VERSION};
use crate::error::VitalsResult;
use crate::storage::{MetricStore, PostgresMirror, StoreOptions};

/// Build the collector's store from configuration, restoring the snapshot
/// when asked to. A snapshot that exists but cannot be parsed is an error.
pub async fn build_store(config: &ServerConfig) -> VitalsResult<Arc<MetricStore>> {
    let mut options = StoreOptions::default()
        .with_store_interval(config.store_interval())
        .with_restore(config.restore_on_start);

    if let Some(path) = config.snapshot_path() {
        options = options.with_snapshot(path);
    }

    if let Some(dsn) = config.database_dsn() {
        let mirror = PostgresMirror::connect(dsn, MIRROR_POOL_SIZE)?;
        options = options.with_mirror(Arc::new(mirror));
        info!(target: "vitals::server", "Relational mirror enabled");
    }

    let store = MetricStore::open(options).await?;
    Ok(Arc::new(store))
}

/// Serve `app` until `shutdown` fires, then give in-flight requests at most
/// `grace` to finish.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
    grace: Duration,
) -> VitalsResult<()> {
    let drain = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { drain.cancelled().await })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result.map_err(Into::into),
        _ = shutdown.cancelled() => {}
    }

    info!(target: "vitals::server", grace_secs = grace.as_secs(), "Draining in-flight requests");
    match tokio::time::timeout(grace, server).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            warn!(target: "vitals::server", "Grace period elapsed with requests still in flight");
            Ok(())
        }
    }
}

/// Run the collector until `shutdown` fires
pub async fn run(config: ServerConfig, shutdown: CancellationToken) -> VitalsResult<()> {
    let address = config.listen_address();
    let listener = TcpListener::bind(&address).await?;

    let store = build_store(&config).await?;
    let snapshot_task = store.spawn_snapshot_task(shutdown.child_token());
    let app = router(AppState::new(Arc::clone(&store), config.signer()), config.max_connections);

    info!(
        target: "vitals::server",
        version = VITALS_VERSION,
        address = %address,
        write_through = store.is_write_through(),
        mirror = store.has_mirror(),
        signing = config.signer().is_some(),
        "Collector listening"
    );

    let served = serve(listener, app, shutdown.clone(), SHUTDOWN_GRACE_PERIOD).await;

    shutdown.cancel();
    if let Some(task) = snapshot_task {
        if let Err(e) = task.await {
            warn!(target: "vitals::server", error = %e, "Snapshot task did not stop cleanly");
        }
    }

    store.shutdown().await?;
    info!(target: "vitals::server", "Collector stopped");
    served
}

/// Resolve on SIGINT or SIGTERM
#[cfg(unix)]
pub async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!(target: "vitals::signal", "Received SIGTERM"),
        _ = sigint.recv() => info!(target: "vitals::signal", "Received SIGINT"),
    }
    Ok(())
}

/// Resolve on Ctrl-C
#[cfg(not(unix))]
pub async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!(target: "vitals::signal", "Received Ctrl-C");
    Ok(())
}
