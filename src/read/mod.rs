//! Reading a local source file as a sequence of Arrow record batches.
//!
//! The reader is finite and single-pass: restarting requires reopening
//! the file. Parquet sources iterate with the file's native batch
//! segmentation; CSV sources yield exactly one batch holding the whole
//! parsed file.

use arrow::compute::concat_batches;
use arrow::csv;
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

use crate::error::IngestError;
use crate::source::SourceFormat;

/// Row-count caps for a single read call. Parquet batches never exceed
/// this; CSV parses in chunks of this size before concatenation.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    pub parquet_batch_rows: usize,
    pub csv_chunk_rows: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            parquet_batch_rows: 8192,
            csv_chunk_rows: 8192,
        }
    }
}

enum ReaderImpl {
    Parquet(ParquetRecordBatchReader),
    // The single CSV batch, taken on first `next()`.
    Csv(Option<RecordBatch>),
}

/// Lazy, finite sequence of record batches over one source file.
pub struct BatchReader {
    inner: ReaderImpl,
    total_rows: Option<u64>,
}

impl std::fmt::Debug for BatchReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchReader")
            .field("total_rows", &self.total_rows)
            .finish_non_exhaustive()
    }
}

impl BatchReader {
    pub fn open(path: &Path, format: SourceFormat) -> Result<Self, IngestError> {
        Self::open_with(path, format, ReaderOptions::default())
    }

    pub fn open_with(
        path: &Path,
        format: SourceFormat,
        options: ReaderOptions,
    ) -> Result<Self, IngestError> {
        match format {
            SourceFormat::Parquet => Self::open_parquet(path, options.parquet_batch_rows),
            SourceFormat::Csv => Self::open_csv(path, options.csv_chunk_rows),
        }
    }

    fn open_parquet(path: &Path, batch_rows: usize) -> Result<Self, IngestError> {
        let file = File::open(path)
            .map_err(|e| IngestError::Parse(format!("failed to open {}: {}", path.display(), e)))?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let total_rows = builder.metadata().file_metadata().num_rows();
        let reader = builder.with_batch_size(batch_rows).build()?;

        Ok(Self {
            inner: ReaderImpl::Parquet(reader),
            // Cheap metadata read; avoids a second pass over the file.
            total_rows: u64::try_from(total_rows).ok(),
        })
    }

    fn open_csv(path: &Path, chunk_rows: usize) -> Result<Self, IngestError> {
        let mut file = File::open(path)
            .map_err(|e| IngestError::Parse(format!("failed to open {}: {}", path.display(), e)))?;

        let format = csv::reader::Format::default().with_header(true);
        let (schema, _) = format.infer_schema(&mut file, None)?;
        file.rewind()
            .map_err(|e| IngestError::Parse(format!("failed to rewind {}: {}", path.display(), e)))?;

        let schema = Arc::new(schema);
        let reader = csv::ReaderBuilder::new(schema.clone())
            .with_format(format)
            .with_batch_size(chunk_rows)
            .build(file)?;

        // Parse in arrow-native chunks, then concatenate: the contract is
        // one batch for the whole file, and memory here is O(file size)
        // by design.
        let chunks = reader.collect::<Result<Vec<_>, _>>()?;
        let batch = if chunks.is_empty() {
            RecordBatch::new_empty(schema)
        } else {
            concat_batches(&schema, &chunks)?
        };

        Ok(Self {
            inner: ReaderImpl::Csv(Some(batch)),
            total_rows: None,
        })
    }

    /// Expected row count, when the source carries it as metadata.
    /// Known for parquet, unknown for CSV.
    pub fn total_rows(&self) -> Option<u64> {
        self.total_rows
    }
}

impl Iterator for BatchReader {
    type Item = Result<RecordBatch, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            ReaderImpl::Parquet(reader) => {
                reader.next().map(|r| r.map_err(IngestError::from))
            }
            ReaderImpl::Csv(batch) => batch.take().map(Ok),
        }
    }
}
