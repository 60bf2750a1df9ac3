//! Error types for the ingest pipeline

use thiserror::Error;

/// Errors that can occur during an ingest run.
///
/// Every variant aborts the run; there is no partial-success return value.
/// `Write` and `Cancelled` carry the number of rows already committed to the
/// destination so the operator knows where to resume.
#[derive(Debug, Error)]
pub enum IngestError {
    /// URL does not name a supported source format
    #[error("unsupported source format in url: {0}")]
    UnsupportedFormat(String),

    /// Network or transfer failure while downloading the source
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Malformed source file content
    #[error("parse failed: {0}")]
    Parse(String),

    /// A required field could not be normalized
    #[error("transform failed on batch {batch_index}: {message}")]
    Transform { batch_index: usize, message: String },

    /// Destination table is missing or incompatible with the batch columns
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Database write failure
    #[error("write failed after {rows_committed} rows committed: {message}")]
    Write {
        rows_committed: u64,
        message: String,
        /// Whether a retry could plausibly succeed (transport-level failure)
        transient: bool,
    },

    /// Cancellation requested; took effect at a batch boundary
    #[error("cancelled after {rows_committed} rows committed")]
    Cancelled { rows_committed: u64 },

    /// Missing or invalid invocation parameter
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IngestError {
    /// Whether retrying the failed operation could succeed.
    ///
    /// Only fetch failures and transport-level write failures qualify.
    /// Parse, transform, and schema errors are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Fetch(_) => true,
            IngestError::Write { transient, .. } => *transient,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        let transient = matches!(
            e,
            sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed
        );
        IngestError::Write {
            rows_committed: 0,
            message: e.to_string(),
            transient,
        }
    }
}

impl From<arrow::error::ArrowError> for IngestError {
    fn from(e: arrow::error::ArrowError) -> Self {
        IngestError::Parse(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for IngestError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        IngestError::Parse(e.to_string())
    }
}
