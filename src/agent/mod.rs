// ============================================================================
// SECTION 10: AGENT (PRODUCER COLLECTOR LOOP)
// ============================================================================
// Two independently scheduled tasks sharing one in-memory staging store:
// - poll:   every poll_interval, sample gauges and tick PollCount
// - report: every report_interval, split staged metrics into batches and
//           push them to the collector, at most `rate_limit` in flight
// Delivery is at-most-once: a failed batch is logged and dropped.
// ============================================================================

mod reporter;
mod sampler;

pub use reporter::{Reporter, ReporterStats};
pub use sampler::{Sampler, SystemSampler};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::constants::POLL_COUNT_ID;
use crate::error::{VitalsError, VitalsResult};
use crate::metric::Metric;
use crate::storage::MetricStore;

/// Outcome of one report cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub metrics: usize,
    pub batches: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct Agent {
    staging: Arc<MetricStore>,
    sampler: Arc<dyn Sampler>,
    reporter: Arc<Reporter>,
    limiter: Arc<Semaphore>,
    poll_interval: Duration,
    report_interval: Duration,
    batch_size: usize,
}

impl Agent {
    pub fn new(config: &AgentConfig, sampler: Arc<dyn Sampler>, reporter: Reporter) -> Self {
        Self {
            staging: Arc::new(MetricStore::in_memory()),
            sampler,
            reporter: Arc::new(reporter),
            limiter: Arc::new(Semaphore::new(config.rate_limit.max(1))),
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn staging(&self) -> &Arc<MetricStore> {
        &self.staging
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Sample once: every gauge, then one PollCount tick
    pub async fn poll_once(&self) -> VitalsResult<usize> {
        let sampler = Arc::clone(&self.sampler);
        let gauges = tokio::task::spawn_blocking(move || sampler.sample())
            .await
            .map_err(|e| VitalsError::Internal(format!("sampler task failed: {e}")))?;

        self.staging.update_batch(&gauges).await?;
        self.staging.update(&Metric::counter(POLL_COUNT_ID, 1)).await?;

        debug!(
            target: "vitals::agent",
            sampler = self.sampler.name(),
            gauges = gauges.len(),
            "Poll complete"
        );
        Ok(gauges.len() + 1)
    }

    /// Flush everything staged, in batches of `batch_size`
    pub async fn report_once(&self) -> ReportSummary {
        let metrics = self.take_staged().await;
        if metrics.is_empty() {
            return ReportSummary::default();
        }

        let mut summary = ReportSummary {
            metrics: metrics.len(),
            ..Default::default()
        };
        let mut in_flight = JoinSet::new();

        for chunk in metrics.chunks(self.batch_size) {
            let batch = chunk.to_vec();
            let reporter = Arc::clone(&self.reporter);
            let limiter = Arc::clone(&self.limiter);
            summary.batches += 1;

            in_flight.spawn(async move {
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return false;
                };
                match reporter.send_batch(&batch).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            target: "vitals::agent",
                            error = %e,
                            metrics = batch.len(),
                            "Batch dropped"
                        );
                        false
                    }
                }
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(true) => summary.delivered += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    error!(target: "vitals::agent", error = %e, "Report task panicked");
                    summary.failed += 1;
                }
            }
        }

        info!(
            target: "vitals::agent",
            metrics = summary.metrics,
            batches = summary.batches,
            delivered = summary.delivered,
            failed = summary.failed,
            "Report cycle finished"
        );
        summary
    }

    /// Read the staging store. The PollCount total is turned into a counter
    /// delta and subtracted from staging, so each tick is reported once even
    /// if the batch carrying it is later dropped.
    async fn take_staged(&self) -> Vec<Metric> {
        let mut metrics = Vec::new();
        for (id, value) in self.staging.entries().await {
            if id == POLL_COUNT_ID {
                let delta = value as i64;
                if delta == 0 {
                    continue;
                }
                if let Err(e) = self.staging.update(&Metric::counter(POLL_COUNT_ID, -delta)).await {
                    warn!(target: "vitals::agent", error = %e, "Failed to reset staged PollCount");
                }
                metrics.push(Metric::counter(id, delta));
            } else {
                metrics.push(Metric::gauge(id, value));
            }
        }
        metrics
    }

    /// Run both loops until `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            target: "vitals::agent",
            endpoint = %self.reporter.endpoint(),
            poll_secs = self.poll_interval.as_secs(),
            report_secs = self.report_interval.as_secs(),
            batch_size = self.batch_size,
            "Agent started"
        );

        let poller = tokio::spawn(Arc::clone(&self).poll_loop(cancel.clone()));
        let flusher = tokio::spawn(Arc::clone(&self).report_loop(cancel.clone()));

        for (name, joined) in [("poll", poller.await), ("report", flusher.await)] {
            if let Err(e) = joined {
                error!(target: "vitals::agent", task = name, error = %e, "Agent task failed");
            }
        }

        let (sent, failed, metrics) = self.reporter.stats().snapshot();
        info!(
            target: "vitals::agent",
            batches_sent = sent,
            batches_failed = failed,
            metrics_sent = metrics,
            "Agent stopped"
        );
    }

    async fn poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(
                            target: "vitals::agent",
                            category = e.category(),
                            recoverable = e.is_recoverable(),
                            error = %e,
                            "Poll failed"
                        );
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }

    async fn report_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.report_interval, self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report_once().await;
                }
                _ = cancel.cancelled() => break,
            }
        }
    }
}
