// ============================================================================
// SECTION 2: ERROR HANDLING
// ============================================================================
// One error enum per subsystem, all convertible into `VitalsError`.
// Client-facing classification (4xx vs 5xx) is derived from these types by
// the ingest layer; retry classification by `MirrorError::is_transient`.
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ----------------------------------------------------------------------------
// 2.1 Top-Level Error
// ----------------------------------------------------------------------------

/// The main error type for Vitals.
/// All subsystem errors can be converted to this type.
#[derive(Error, Debug)]
pub enum VitalsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VitalsError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            VitalsError::Config(_) => false,
            VitalsError::Validation(_) => false,
            VitalsError::Store(e) => e.is_recoverable(),
            VitalsError::Mirror(e) => e.is_transient(),
            VitalsError::Codec(_) => false,
            VitalsError::Report(_) => true,
            VitalsError::Io(_) => true,
            VitalsError::Internal(_) => false,
        }
    }

    /// Short category label used as a structured log field
    pub fn category(&self) -> &'static str {
        match self {
            VitalsError::Config(_) => "config",
            VitalsError::Validation(_) => "validation",
            VitalsError::Store(_) => "store",
            VitalsError::Mirror(_) => "mirror",
            VitalsError::Codec(_) => "codec",
            VitalsError::Report(_) => "report",
            VitalsError::Io(_) => "io",
            VitalsError::Internal(_) => "internal",
        }
    }
}

pub type VitalsResult<T> = Result<T, VitalsError>;

// ----------------------------------------------------------------------------
// 2.2 Configuration Errors
// ----------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        ConfigError::ParseError {
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// 2.3 Metric Validation Errors
// ----------------------------------------------------------------------------

/// Structural problems with an inbound metric. Always a client error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("metric id must not be empty")]
    EmptyId,

    #[error("unknown metric type '{kind}'")]
    UnknownKind { kind: String },

    #[error("gauge '{metric_id}' has no value")]
    MissingValue { metric_id: String },

    #[error("counter '{metric_id}' has no delta")]
    MissingDelta { metric_id: String },

    #[error("value '{raw}' is not a finite number")]
    NotANumber { raw: String },
}

impl ValidationError {
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        ValidationError::UnknownKind { kind: kind.into() }
    }
}

// ----------------------------------------------------------------------------
// 2.4 Mirror Errors
// ----------------------------------------------------------------------------

/// Failures of the relational mirror.
#[derive(Error, Debug, Clone)]
pub enum MirrorError {
    /// Connection-class failure: refused, reset, pool exhausted, SQLSTATE 08xxx
    #[error("mirror connection failed: {message}")]
    Connection { message: String },

    #[error("mirror {operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    /// Anything the database rejected for a non-connection reason
    #[error("mirror query failed: {message}")]
    Query { message: String },

    #[error("mirror record encoding failed: {message}")]
    Encoding { message: String },
}

impl MirrorError {
    /// Default transient predicate for mirror writes.
    pub fn is_transient(&self) -> bool {
        matches!(self, MirrorError::Connection { .. } | MirrorError::Timeout { .. })
    }
}

// ----------------------------------------------------------------------------
// 2.5 Store Errors
// ----------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("metric not found: {metric_id}")]
    NotFound { metric_id: String },

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error("mirror is not configured")]
    MirrorDisabled,

    #[error("snapshot {path} failed: {message}")]
    Snapshot { path: PathBuf, message: String },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Every failed item of one batch, in submission order
    #[error("{}", join_lines(.failures))]
    Batch { failures: Vec<StoreError> },
}

impl StoreError {
    pub fn not_found(metric_id: impl Into<String>) -> Self {
        StoreError::NotFound {
            metric_id: metric_id.into(),
        }
    }

    pub fn snapshot(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        StoreError::Snapshot {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Client-caused failures map to 4xx, everything else to 5xx
    pub fn is_client_error(&self) -> bool {
        match self {
            StoreError::NotFound { .. } | StoreError::Invalid(_) => true,
            StoreError::Batch { failures } => failures.iter().all(StoreError::is_client_error),
            _ => false,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            StoreError::Mirror(e) => e.is_transient(),
            StoreError::Snapshot { .. } => true,
            StoreError::Batch { failures } => failures.iter().any(StoreError::is_recoverable),
            _ => false,
        }
    }
}

fn join_lines(failures: &[StoreError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub type StoreResult<T> = Result<T, StoreError>;

// ----------------------------------------------------------------------------
// 2.6 Transport Codec Errors
// ----------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode payload: {message}")]
    Encode { message: String },

    #[error("failed to decode payload: {message}")]
    Decode { message: String },

    #[error("gzip compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("gzip decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("decompressed body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("signing key rejected: {message}")]
    InvalidKey { message: String },
}

pub type CodecResult<T> = Result<T, CodecError>;

// ----------------------------------------------------------------------------
// 2.7 Producer Report Errors
// ----------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("collector answered {status} for {url}")]
    Status { url: String, status: u16 },
}

pub type ReportResult<T> = Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MirrorError::Connection { message: "refused".into() }.is_transient());
        assert!(MirrorError::Timeout { operation: "upsert", after: Duration::from_secs(10) }.is_transient());
        assert!(!MirrorError::Query { message: "unique violation".into() }.is_transient());
    }

    #[test]
    fn test_batch_error_joins_every_failure() {
        let err = StoreError::Batch {
            failures: vec![
                StoreError::Invalid(ValidationError::EmptyId),
                StoreError::Mirror(MirrorError::Query { message: "boom".into() }),
            ],
        };
        let rendered = err.to_string();
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("metric id must not be empty"));
        assert!(rendered.contains("boom"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(StoreError::not_found("Alloc").is_client_error());
        assert!(!StoreError::MirrorDisabled.is_client_error());
        let all_invalid = StoreError::Batch {
            failures: vec![StoreError::Invalid(ValidationError::EmptyId)],
        };
        assert!(all_invalid.is_client_error());
    }

    #[test]
    fn test_top_level_category() {
        let err: VitalsError = ConfigError::invalid_value("poll_interval", "must be > 0").into();
        assert_eq!(err.category(), "config");
        assert!(!err.is_recoverable());
    }
}
