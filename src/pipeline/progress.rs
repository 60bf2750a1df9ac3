//! Progress accounting for a pipeline run.

/// Emitted after every successful batch write.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub batch_index: usize,
    pub rows_this_batch: u64,
    pub cumulative_rows: u64,
    /// Present only when the source reports an expected total.
    pub percent_done: Option<f64>,
}

/// Mutated monotonically as batches are written.
#[derive(Debug)]
pub struct ProgressState {
    total_rows_expected: Option<u64>,
    rows_inserted: u64,
}

impl ProgressState {
    pub fn new(total_rows_expected: Option<u64>) -> Self {
        Self {
            total_rows_expected,
            rows_inserted: 0,
        }
    }

    pub fn rows_inserted(&self) -> u64 {
        self.rows_inserted
    }

    pub fn total_rows_expected(&self) -> Option<u64> {
        self.total_rows_expected
    }

    /// Record a successful batch write and produce the progress event.
    pub fn record(&mut self, batch_index: usize, rows_this_batch: u64) -> ProgressEvent {
        self.rows_inserted += rows_this_batch;
        ProgressEvent {
            batch_index,
            rows_this_batch,
            cumulative_rows: self.rows_inserted,
            percent_done: self.percent_done(),
        }
    }

    /// Percent complete, rounded to one decimal place.
    fn percent_done(&self) -> Option<f64> {
        match self.total_rows_expected {
            Some(total) if total > 0 => {
                Some((self.rows_inserted as f64 / total as f64 * 1000.0).round() / 10.0)
            }
            _ => None,
        }
    }
}
