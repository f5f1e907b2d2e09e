//! Relational mirror seam.
//!
//! The store only needs two things from a durable replica: upsert one fully
//! typed record, and answer a health check. Everything else (schema, pool,
//! driver error codes) stays behind this trait.

use async_trait::async_trait;

use crate::error::MirrorError;
use crate::metric::MetricPayload;

/// A durable, best-effort replica of the in-memory store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MirrorBackend: Send + Sync {
    /// Insert or replace the row keyed by `record.id`
    async fn upsert(&self, record: &MetricPayload) -> Result<(), MirrorError>;

    /// Cheap round trip proving the backend is reachable
    async fn ping(&self) -> Result<(), MirrorError>;
}

/// Decides whether a failed mirror write deserves another attempt
pub type TransientPredicate = fn(&MirrorError) -> bool;
