//! Appending record batches to a destination.

mod collecting;
mod postgres;

pub use collecting::CollectingSink;
pub use postgres::PostgresTableWriter;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use crate::error::IngestError;

/// A destination for transformed batches.
///
/// Implementations are append-only: rows already present at the
/// destination are never modified or deleted. `append` returns the exact
/// number of rows written so the caller can accumulate progress.
#[async_trait]
pub trait BatchSink: Send {
    async fn append(&mut self, batch: &RecordBatch) -> Result<usize, IngestError>;
}
