// ============================================================================
// SECTION 1: CONSTANTS & DEFAULTS
// ============================================================================
// Every tunable default lives here so the config layer, the agent and the
// server agree on one set of values.
// ============================================================================

use std::time::Duration;

/// Crate version string
pub const VITALS_VERSION: &str = env!("CARGO_PKG_VERSION");

// ----------------------------------------------------------------------------
// 1.1 Network
// ----------------------------------------------------------------------------

/// Default collector listen / target address
pub const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Default cap on concurrently served requests
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Grace period for in-flight requests after a shutdown signal
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Per-request timeout used by the agent's HTTP client
pub const REPORT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ----------------------------------------------------------------------------
// 1.2 Agent cadence
// ----------------------------------------------------------------------------

/// Seconds between two samples
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Seconds between two flushes to the collector
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 10;

/// Metrics per outbound batch
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Outbound batches in flight at once
pub const DEFAULT_RATE_LIMIT: usize = 1;

// ----------------------------------------------------------------------------
// 1.3 Storage
// ----------------------------------------------------------------------------

/// Seconds between snapshots; zero switches to write-through
pub const DEFAULT_STORE_INTERVAL_SECS: u64 = 300;

/// Default snapshot location
pub const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/metrics-db.json";

/// Restore from the snapshot on start by default
pub const DEFAULT_RESTORE_ON_START: bool = true;

/// Upper bound for any single mirror operation
pub const MIRROR_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra attempts after the first failed mirror write
pub const MIRROR_MAX_RETRIES: u32 = 3;

/// Base unit for the 1s / 3s / 5s retry ladder
pub const MIRROR_RETRY_UNIT: Duration = Duration::from_secs(1);

/// Pool size for the mirror; writes are serialized by the store lock
pub const MIRROR_POOL_SIZE: u32 = 4;

/// Mirror table name
pub const MIRROR_TABLE: &str = "metrics";

// ----------------------------------------------------------------------------
// 1.4 Wire protocol
// ----------------------------------------------------------------------------

/// Self-incrementing counter id; its delta defaults to 1
pub const POLL_COUNT_ID: &str = "PollCount";

/// Integrity signature header
pub const HASH_HEADER: &str = "HashSHA256";

/// Largest request body the collector buffers
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
