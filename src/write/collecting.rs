//! A sink that collects batches in memory.

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use super::BatchSink;
use crate::error::IngestError;

/// In-memory sink for tests and dry runs.
#[derive(Debug, Default)]
pub struct CollectingSink {
    batches: Vec<RecordBatch>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }

    /// Total row count across all appended batches.
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

#[async_trait]
impl BatchSink for CollectingSink {
    async fn append(&mut self, batch: &RecordBatch) -> Result<usize, IngestError> {
        self.batches.push(batch.clone());
        Ok(batch.num_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_collecting_sink_accumulates_rows() {
        let schema = Schema::new(vec![Field::new("id", DataType::Int32, false)]);

        let batch1 = RecordBatch::try_new(
            Arc::new(schema.clone()),
            vec![Arc::new(Int32Array::from(vec![1, 2, 3]))],
        )
        .unwrap();
        let batch2 = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(Int32Array::from(vec![4, 5]))],
        )
        .unwrap();

        let mut sink = CollectingSink::new();
        assert_eq!(sink.append(&batch1).await.unwrap(), 3);
        assert_eq!(sink.append(&batch2).await.unwrap(), 2);

        assert_eq!(sink.row_count(), 5);
        assert_eq!(sink.batches().len(), 2);
    }
}
