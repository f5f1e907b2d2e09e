// ============================================================================
// SECTION 5: METRIC STORE
// ============================================================================
// Authoritative id → value map behind one coarse read/write lock.
// - Counters accumulate, gauges overwrite
// - Optional flat-file snapshot: periodic, or write-through when the interval
//   is zero, plus one final flush at shutdown
// - Optional relational mirror, written under the lock with bounded retry
// ============================================================================

mod mirror;
mod postgres;
mod snapshot;

pub use mirror::{MirrorBackend, TransientPredicate};
pub use postgres::PostgresMirror;
pub use snapshot::SnapshotFile;

#[cfg(test)]
pub use mirror::MockMirrorBackend;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_STORE_INTERVAL_SECS, MIRROR_TIMEOUT};
use crate::error::{MirrorError, StoreError, StoreResult};
use crate::metric::{Measurement, Metric, MetricPayload};
use crate::retry::{retry_transient, RetryPolicy};

// ----------------------------------------------------------------------------
// 5.1 Store Options
// ----------------------------------------------------------------------------

/// Construction options for [`MetricStore`]
#[derive(Clone)]
pub struct StoreOptions {
    /// Snapshot file; `None` disables flat-file persistence
    pub snapshot_path: Option<PathBuf>,
    /// Snapshot period; zero means snapshot after every update
    pub store_interval: Duration,
    /// Seed the map from the snapshot file in [`MetricStore::open`]
    pub restore_on_start: bool,
    pub mirror: Option<Arc<dyn MirrorBackend>>,
    pub retry: RetryPolicy,
    pub is_transient: TransientPredicate,
    /// Bound for each individual mirror call
    pub mirror_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            store_interval: Duration::from_secs(DEFAULT_STORE_INTERVAL_SECS),
            restore_on_start: false,
            mirror: None,
            retry: RetryPolicy::default(),
            is_transient: MirrorError::is_transient,
            mirror_timeout: MIRROR_TIMEOUT,
        }
    }
}

impl StoreOptions {
    #[inline]
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    #[inline]
    pub fn with_store_interval(mut self, interval: Duration) -> Self {
        self.store_interval = interval;
        self
    }

    #[inline]
    pub fn with_restore(mut self, restore: bool) -> Self {
        self.restore_on_start = restore;
        self
    }

    #[inline]
    pub fn with_mirror(mut self, mirror: Arc<dyn MirrorBackend>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    #[inline]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    pub fn with_transient_predicate(mut self, predicate: TransientPredicate) -> Self {
        self.is_transient = predicate;
        self
    }

    #[inline]
    pub fn with_mirror_timeout(mut self, timeout: Duration) -> Self {
        self.mirror_timeout = timeout;
        self
    }
}

// ----------------------------------------------------------------------------
// 5.2 Metric Store
// ----------------------------------------------------------------------------

/// Concurrency-safe metric store.
///
/// Every write holds the single write lock for the full duration of the
/// in-memory update, the mirror upsert (including retries) and, in
/// write-through mode, the snapshot. Mirror writes therefore land in the
/// same order as the in-memory updates.
pub struct MetricStore {
    values: RwLock<HashMap<String, f64>>,
    snapshot: Option<SnapshotFile>,
    mirror: Option<Arc<dyn MirrorBackend>>,
    retry: RetryPolicy,
    is_transient: TransientPredicate,
    mirror_timeout: Duration,
    store_interval: Duration,
}

impl MetricStore {
    /// Build an empty store. No I/O happens here.
    pub fn new(options: StoreOptions) -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            snapshot: options.snapshot_path.map(SnapshotFile::new),
            mirror: options.mirror,
            retry: options.retry,
            is_transient: options.is_transient,
            mirror_timeout: options.mirror_timeout,
            store_interval: options.store_interval,
        }
    }

    /// Non-durable store, used as the agent's staging area
    pub fn in_memory() -> Self {
        Self::new(StoreOptions::default())
    }

    /// Build a store and, if requested, seed it from the snapshot file
    pub async fn open(options: StoreOptions) -> StoreResult<Self> {
        let restore = options.restore_on_start;
        let store = Self::new(options);
        if restore {
            store.restore().await?;
        }
        Ok(store)
    }

    #[inline]
    pub fn is_write_through(&self) -> bool {
        self.store_interval.is_zero()
    }

    #[inline]
    pub fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    /// Apply one update and return the resolved value.
    ///
    /// The in-memory value is updated even if the mirror write then fails.
    pub async fn update(&self, metric: &Metric) -> StoreResult<f64> {
        let mut values = self.values.write().await;

        let resolved = match metric.measurement {
            Measurement::Counter(delta) => {
                let slot = values.entry(metric.id.clone()).or_insert(0.0);
                *slot += delta as f64;
                *slot
            }
            Measurement::Gauge(value) => {
                values.insert(metric.id.clone(), value);
                value
            }
        };

        debug!(
            target: "vitals::store",
            metric_id = %metric.id,
            kind = %metric.kind(),
            resolved,
            "Metric updated"
        );

        let mirrored = match &self.mirror {
            Some(mirror) => {
                let record = metric.resolved_payload(resolved);
                self.write_mirror(mirror.as_ref(), &record).await
            }
            None => Ok(()),
        };

        if self.is_write_through() {
            if let Some(snapshot) = &self.snapshot {
                snapshot.write(&values).await?;
            }
        }

        if let Err(error) = mirrored {
            warn!(
                target: "vitals::store",
                metric_id = %metric.id,
                error = %error,
                "Mirror write failed; in-memory value kept"
            );
            return Err(error.into());
        }

        Ok(resolved)
    }

    /// Apply every metric in order. Failures do not stop the batch; they are
    /// collected into one `StoreError::Batch`.
    pub async fn update_batch(&self, metrics: &[Metric]) -> StoreResult<()> {
        let mut failures = Vec::new();
        for metric in metrics {
            if let Err(error) = self.update(metric).await {
                failures.push(error);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(
                target: "vitals::store",
                failed = failures.len(),
                total = metrics.len(),
                "Batch applied with failures"
            );
            Err(StoreError::Batch { failures })
        }
    }

    pub async fn get(&self, id: &str) -> StoreResult<f64> {
        self.values
            .read()
            .await
            .get(id)
            .copied()
            .ok_or_else(|| StoreError::not_found(id))
    }

    /// All ids, sorted lexicographically
    pub async fn enumerate(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.values.read().await.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// All `(id, value)` pairs, sorted by id
    pub async fn entries(&self) -> Vec<(String, f64)> {
        let mut entries: Vec<(String, f64)> = self
            .values
            .read()
            .await
            .iter()
            .map(|(id, value)| (id.clone(), *value))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }

    /// Write the whole map to the snapshot file. No-op without a file.
    pub async fn snapshot(&self) -> StoreResult<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let values = self.values.read().await;
        snapshot.write(&values).await
    }

    /// Merge the snapshot file into the map; returns the number of ids read.
    pub async fn restore(&self) -> StoreResult<usize> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(0);
        };
        let restored = snapshot.read().await?;
        let count = restored.len();
        self.values.write().await.extend(restored);
        info!(
            target: "vitals::store",
            path = %snapshot.path().display(),
            metrics = count,
            "Store restored from snapshot"
        );
        Ok(count)
    }

    /// Mirror health check, bounded by the mirror timeout
    pub async fn ping(&self) -> StoreResult<()> {
        let Some(mirror) = &self.mirror else {
            return Err(StoreError::MirrorDisabled);
        };
        let timeout = self.mirror_timeout;
        tokio::time::timeout(timeout, mirror.ping())
            .await
            .map_err(|_| MirrorError::Timeout { operation: "ping", after: timeout })??;
        Ok(())
    }

    /// Run the periodic snapshot loop until `cancel` fires. Returns `None`
    /// when there is no file or the store is in write-through mode.
    pub fn spawn_snapshot_task(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.snapshot.is_none() || self.is_write_through() {
            return None;
        }

        let store = Arc::clone(self);
        let period = self.store_interval;

        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(target: "vitals::store", period_secs = period.as_secs(), "Snapshot task started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = store.snapshot().await {
                            warn!(target: "vitals::store", error = %error, "Periodic snapshot failed");
                        }
                    }
                    _ = cancel.cancelled() => {
                        debug!(target: "vitals::store", "Snapshot task stopping");
                        break;
                    }
                }
            }
        }))
    }

    /// Final flush at process exit
    pub async fn shutdown(&self) -> StoreResult<()> {
        self.snapshot().await?;
        let metrics = self.len().await;
        info!(target: "vitals::store", metrics, "Store flushed on shutdown");
        Ok(())
    }

    async fn write_mirror(&self, mirror: &dyn MirrorBackend, record: &MetricPayload) -> Result<(), MirrorError> {
        let timeout = self.mirror_timeout;
        retry_transient(self.retry, "mirror.upsert", self.is_transient, || async move {
            tokio::time::timeout(timeout, mirror.upsert(record))
                .await
                .map_err(|_| MirrorError::Timeout { operation: "upsert", after: timeout })?
        })
        .await
    }
}
