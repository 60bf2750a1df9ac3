//! Per-batch column normalization.
//!
//! Transformation is pure: same row count or fewer, surviving rows keep
//! their order, batch boundaries are untouched.

mod filter;

pub use filter::{NonZeroCount, RowFilter};

use arrow::array::ArrayRef;
use arrow::compute::{cast_with_options, filter_record_batch, CastOptions};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use arrow::util::display::FormatOptions;
use std::sync::Arc;
use tracing::info;

use crate::error::IngestError;

/// Timestamp columns the destination schema requires. Matched by exact
/// name or suffix, so vendor-prefixed variants like
/// `tpep_pickup_datetime` qualify.
pub const DEFAULT_TIMESTAMP_COLUMNS: [&str; 2] = ["pickup_datetime", "dropoff_datetime"];

/// A transformed batch plus the filter observability counts: how many
/// rows matched the drop predicate before filtering, and how many still
/// match afterwards (always zero when the filter ran).
#[derive(Debug)]
pub struct TransformOutcome {
    pub batch: RecordBatch,
    pub matched_before: usize,
    pub matched_after: usize,
}

pub struct RowTransformer {
    timestamp_columns: Vec<String>,
    filter: Option<Box<dyn RowFilter>>,
}

impl RowTransformer {
    pub fn new() -> Self {
        Self {
            timestamp_columns: DEFAULT_TIMESTAMP_COLUMNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            filter: None,
        }
    }

    pub fn with_timestamp_columns(mut self, columns: Vec<String>) -> Self {
        self.timestamp_columns = columns;
        self
    }

    /// Attach a row filter. Rows the filter marks for dropping are
    /// removed; everything else passes through untouched.
    pub fn with_filter(mut self, filter: Box<dyn RowFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    fn is_timestamp_column(&self, name: &str) -> bool {
        self.timestamp_columns
            .iter()
            .any(|c| name == c || name.ends_with(c.as_str()))
    }

    /// Normalize one batch. `batch_index` is carried into any error so
    /// the operator can locate the offending batch.
    pub fn transform(
        &self,
        batch: &RecordBatch,
        batch_index: usize,
    ) -> Result<TransformOutcome, IngestError> {
        let batch = self.coerce_timestamps(batch, batch_index)?;

        let (batch, matched_before, matched_after) = match &self.filter {
            Some(filter) => {
                let mask = filter.keep_mask(&batch).map_err(|message| {
                    IngestError::Transform {
                        batch_index,
                        message,
                    }
                })?;
                let matched_before = mask.iter().filter(|v| *v == Some(false)).count();

                let filtered = filter_record_batch(&batch, &mask).map_err(|e| {
                    IngestError::Transform {
                        batch_index,
                        message: e.to_string(),
                    }
                })?;

                let after_mask = filter.keep_mask(&filtered).map_err(|message| {
                    IngestError::Transform {
                        batch_index,
                        message,
                    }
                })?;
                let matched_after = after_mask.iter().filter(|v| *v == Some(false)).count();

                info!(
                    filter = filter.name(),
                    batch_index,
                    matched_before,
                    matched_after,
                    "applied row filter"
                );

                (filtered, matched_before, matched_after)
            }
            None => (batch, 0, 0),
        };

        Ok(TransformOutcome {
            batch,
            matched_before,
            matched_after,
        })
    }

    /// Cast designated timestamp columns to a discrete timestamp type.
    /// Unparseable values fail the batch; no silent null substitution.
    fn coerce_timestamps(
        &self,
        batch: &RecordBatch,
        batch_index: usize,
    ) -> Result<RecordBatch, IngestError> {
        let target = DataType::Timestamp(TimeUnit::Microsecond, None);
        let options = CastOptions {
            safe: false,
            format_options: FormatOptions::default(),
        };

        let mut fields: Vec<Field> = Vec::with_capacity(batch.num_columns());
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());

        for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
            if self.is_timestamp_column(field.name()) && field.data_type() != &target {
                let cast = cast_with_options(column, &target, &options).map_err(|e| {
                    IngestError::Transform {
                        batch_index,
                        message: format!("column '{}': {}", field.name(), e),
                    }
                })?;
                fields.push(Field::new(field.name(), target.clone(), field.is_nullable()));
                columns.push(cast);
            } else {
                fields.push(field.as_ref().clone());
                columns.push(column.clone());
            }
        }

        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).map_err(|e| {
            IngestError::Transform {
                batch_index,
                message: e.to_string(),
            }
        })
    }
}

impl Default for RowTransformer {
    fn default() -> Self {
        Self::new()
    }
}
