//! Pluggable row filters.

use arrow::array::{Array, AsArray, BooleanArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use arrow::record_batch::RecordBatch;

/// A predicate over the rows of a batch, expressed as a keep-mask.
///
/// `true` keeps the row, `false` drops it. Masks must have exactly one
/// entry per row and must not contain nulls.
pub trait RowFilter: Send + Sync {
    /// Name used in log output.
    fn name(&self) -> &str;

    fn keep_mask(&self, batch: &RecordBatch) -> Result<BooleanArray, String>;
}

/// Drops rows whose count column equals zero ("zero passengers is
/// invalid"). NULL counts are kept; only a literal zero is the invalid
/// value. A batch without the column passes through unfiltered.
#[derive(Debug, Clone)]
pub struct NonZeroCount {
    column: String,
}

impl NonZeroCount {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl RowFilter for NonZeroCount {
    fn name(&self) -> &str {
        "non_zero_count"
    }

    fn keep_mask(&self, batch: &RecordBatch) -> Result<BooleanArray, String> {
        let column = match batch.column_by_name(&self.column) {
            Some(column) => column,
            None => return Ok(BooleanArray::from(vec![true; batch.num_rows()])),
        };

        // Count columns show up as int or float depending on the source
        // encoding; compare through f64 to cover both.
        let column = cast(column, &DataType::Float64)
            .map_err(|e| format!("column '{}' is not numeric: {}", self.column, e))?;
        let values = column.as_primitive::<Float64Type>();

        let mask: BooleanArray = (0..values.len())
            .map(|i| {
                if values.is_null(i) {
                    Some(true)
                } else {
                    Some(values.value(i) != 0.0)
                }
            })
            .collect();

        Ok(mask)
    }
}
