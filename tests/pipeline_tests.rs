//! End-to-end pipeline tests over generated fixtures.

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use pgingest::error::IngestError;
use pgingest::fetch::SourceFetcher;
use pgingest::pipeline::{IngestPipeline, PipelineOptions};
use pgingest::read::ReaderOptions;
use pgingest::source::ConnectionTarget;
use pgingest::transform::{NonZeroCount, RowTransformer};
use pgingest::write::{BatchSink, CollectingSink};

fn target() -> ConnectionTarget {
    ConnectionTarget {
        user: "root".into(),
        password: "root".into(),
        host: "localhost".into(),
        port: 5432,
        database: "ny_taxi".into(),
        table_name: "yellow_taxi_trips".into(),
    }
}

fn trip_batch(rows: usize) -> RecordBatch {
    let schema = Schema::new(vec![
        Field::new("tpep_pickup_datetime", DataType::Utf8, true),
        Field::new("tpep_dropoff_datetime", DataType::Utf8, true),
        Field::new("passenger_count", DataType::Int64, true),
        Field::new("total_amount", DataType::Float64, true),
    ]);

    let pickups: Vec<String> = (0..rows)
        .map(|i| format!("2021-01-01 00:{:02}:00", i % 60))
        .collect();
    let dropoffs: Vec<String> = (0..rows)
        .map(|i| format!("2021-01-01 01:{:02}:00", i % 60))
        .collect();
    let counts: Vec<i64> = (0..rows).map(|i| (i % 4 + 1) as i64).collect();
    let amounts: Vec<f64> = (0..rows).map(|i| 10.0 + i as f64).collect();

    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(StringArray::from(pickups)),
            Arc::new(StringArray::from(dropoffs)),
            Arc::new(Int64Array::from(counts)),
            Arc::new(Float64Array::from(amounts)),
        ],
    )
    .unwrap()
}

fn write_parquet_fixture(dir: &Path, rows: usize) -> PathBuf {
    let path = dir.join("source.parquet");
    let batch = trip_batch(rows);
    let file = File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    path
}

/// Fetcher that copies a local fixture and counts invocations.
#[derive(Debug)]
struct CountingFetcher {
    source: PathBuf,
    calls: AtomicUsize,
}

impl CountingFetcher {
    fn new(source: PathBuf) -> Self {
        Self {
            source,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<(), IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::copy(&self.source, dest)
            .map_err(|e| IngestError::Fetch(format!("copy failed: {}", e)))?;
        Ok(())
    }
}

/// Fetcher whose transfers always fail.
#[derive(Debug, Default)]
struct FailingFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl SourceFetcher for FailingFetcher {
    async fn fetch(&self, url: &str, _dest: &Path) -> Result<(), IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(IngestError::Fetch(format!("{} unreachable", url)))
    }
}

/// Sink that fails on a chosen batch index, permanently or transiently.
struct FailingSink {
    inner: CollectingSink,
    fail_on_batch: usize,
    transient: bool,
    remaining_failures: usize,
    appends: usize,
}

impl FailingSink {
    fn permanent(fail_on_batch: usize) -> Self {
        Self {
            inner: CollectingSink::new(),
            fail_on_batch,
            transient: false,
            remaining_failures: usize::MAX,
            appends: 0,
        }
    }

    fn transient_once(fail_on_batch: usize) -> Self {
        Self {
            inner: CollectingSink::new(),
            fail_on_batch,
            transient: true,
            remaining_failures: 1,
            appends: 0,
        }
    }
}

#[async_trait]
impl BatchSink for FailingSink {
    async fn append(&mut self, batch: &RecordBatch) -> Result<usize, IngestError> {
        let batch_index = self.inner.batches().len();
        self.appends += 1;
        if batch_index == self.fail_on_batch && self.remaining_failures > 0 {
            self.remaining_failures = self.remaining_failures.saturating_sub(1);
            return Err(IngestError::Write {
                rows_committed: 0,
                message: "injected failure".into(),
                transient: self.transient,
            });
        }
        self.inner.append(batch).await
    }
}

fn options(work_dir: &Path) -> PipelineOptions {
    PipelineOptions {
        retry_backoff: Duration::ZERO,
        work_dir: work_dir.to_path_buf(),
        reader: ReaderOptions {
            parquet_batch_rows: 10,
            csv_chunk_rows: 8192,
        },
        ..PipelineOptions::default()
    }
}

#[tokio::test]
async fn test_full_parquet_run_inserts_all_rows() {
    let dir = TempDir::new().unwrap();
    let fixture = write_parquet_fixture(dir.path(), 30);

    let fetcher = Arc::new(CountingFetcher::new(fixture));
    let mut pipeline =
        IngestPipeline::new(fetcher.clone(), RowTransformer::new(), options(dir.path()));
    let mut sink = CollectingSink::new();

    let summary = pipeline
        .run("https://example.com/trips.parquet", &target(), &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.rows_inserted, 30);
    assert_eq!(summary.batches, 3);
    assert_eq!(sink.row_count(), 30);

    // Final progress event covers the whole table.
    let last = summary.events.last().unwrap();
    assert_eq!(last.cumulative_rows, 30);
    assert_eq!(last.percent_done, Some(100.0));

    // Timestamp columns arrive at the sink coerced.
    let schema = sink.batches()[0].schema();
    assert_eq!(
        schema
            .field_with_name("tpep_pickup_datetime")
            .unwrap()
            .data_type(),
        &DataType::Timestamp(TimeUnit::Microsecond, None)
    );
}

#[tokio::test]
async fn test_csv_zero_passenger_rows_are_filtered() {
    let dir = TempDir::new().unwrap();
    let fixture = dir.path().join("source.csv");
    let mut file = File::create(&fixture).unwrap();
    writeln!(file, "pickup_datetime,dropoff_datetime,passenger_count").unwrap();
    writeln!(file, "2021-01-01 00:01:00,2021-01-01 00:10:00,1").unwrap();
    writeln!(file, "2021-01-01 00:02:00,2021-01-01 00:11:00,0").unwrap();
    writeln!(file, "2021-01-01 00:03:00,2021-01-01 00:12:00,2").unwrap();
    writeln!(file, "2021-01-01 00:04:00,2021-01-01 00:13:00,1").unwrap();
    writeln!(file, "2021-01-01 00:05:00,2021-01-01 00:14:00,3").unwrap();
    drop(file);

    let fetcher = Arc::new(CountingFetcher::new(fixture));
    let transformer =
        RowTransformer::new().with_filter(Box::new(NonZeroCount::new("passenger_count")));
    let mut pipeline = IngestPipeline::new(fetcher, transformer, options(dir.path()));
    let mut sink = CollectingSink::new();

    let summary = pipeline
        .run("https://example.com/trips.csv", &target(), &mut sink)
        .await
        .unwrap();

    // One batch for the whole CSV; the zero-passenger row is gone.
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.rows_inserted, 4);
    assert_eq!(summary.rows_filtered, 1);
    assert_eq!(sink.row_count(), 4);

    // Total is unknown for CSV, so no percent in the events.
    assert_eq!(summary.events[0].percent_done, None);
}

#[tokio::test]
async fn test_write_failure_reports_rows_committed() {
    let dir = TempDir::new().unwrap();
    let fixture = write_parquet_fixture(dir.path(), 30);

    let fetcher = Arc::new(CountingFetcher::new(fixture));
    let mut pipeline = IngestPipeline::new(fetcher, RowTransformer::new(), options(dir.path()));
    let mut sink = FailingSink::permanent(1);

    let err = pipeline
        .run("https://example.com/trips.parquet", &target(), &mut sink)
        .await
        .unwrap_err();

    match err {
        IngestError::Write { rows_committed, .. } => assert_eq!(rows_committed, 10),
        other => panic!("expected Write error, got {:?}", other),
    }

    // Batch 1 committed, batches 2 and 3 never landed.
    assert_eq!(sink.inner.row_count(), 10);
}

#[tokio::test]
async fn test_transient_write_failure_is_retried() {
    let dir = TempDir::new().unwrap();
    let fixture = write_parquet_fixture(dir.path(), 30);

    let fetcher = Arc::new(CountingFetcher::new(fixture));
    let mut pipeline = IngestPipeline::new(fetcher, RowTransformer::new(), options(dir.path()));
    let mut sink = FailingSink::transient_once(1);

    let summary = pipeline
        .run("https://example.com/trips.parquet", &target(), &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.rows_inserted, 30);
    // Three batches plus one retried append.
    assert_eq!(sink.appends, 4);
}

#[tokio::test]
async fn test_cache_hit_skips_second_fetch() {
    let dir = TempDir::new().unwrap();
    let fixture = write_parquet_fixture(dir.path(), 30);

    let fetcher = Arc::new(CountingFetcher::new(fixture));
    let mut pipeline =
        IngestPipeline::new(fetcher.clone(), RowTransformer::new(), options(dir.path()));

    let mut first_sink = CollectingSink::new();
    let first = pipeline
        .run("https://example.com/trips.parquet", &target(), &mut first_sink)
        .await
        .unwrap();
    assert!(!first.cache_hit);

    let mut second_sink = CollectingSink::new();
    let second = pipeline
        .run("https://example.com/trips.parquet", &target(), &mut second_sink)
        .await
        .unwrap();

    assert!(second.cache_hit);
    assert_eq!(second.rows_inserted, 30);
    assert_eq!(fetcher.calls(), 1, "second run must not fetch again");
}

#[tokio::test]
async fn test_different_parameters_do_not_share_cache() {
    let dir = TempDir::new().unwrap();
    let fixture = write_parquet_fixture(dir.path(), 30);

    let fetcher = Arc::new(CountingFetcher::new(fixture));
    let mut pipeline =
        IngestPipeline::new(fetcher.clone(), RowTransformer::new(), options(dir.path()));

    let mut sink = CollectingSink::new();
    pipeline
        .run("https://example.com/trips.parquet", &target(), &mut sink)
        .await
        .unwrap();

    let mut other_target = target();
    other_target.table_name = "green_taxi_trips".into();
    let mut sink = CollectingSink::new();
    let second = pipeline
        .run("https://example.com/trips.parquet", &other_target, &mut sink)
        .await
        .unwrap();

    assert!(!second.cache_hit);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_unsupported_format_fails_before_any_fetch() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(FailingFetcher::default());
    let mut pipeline =
        IngestPipeline::new(fetcher.clone(), RowTransformer::new(), options(dir.path()));
    let mut sink = CollectingSink::new();

    let err = pipeline
        .run("https://example.com/data.json", &target(), &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::UnsupportedFormat(_)));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fetch_retries_up_to_budget_then_fails() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(FailingFetcher::default());
    let mut pipeline =
        IngestPipeline::new(fetcher.clone(), RowTransformer::new(), options(dir.path()));
    let mut sink = CollectingSink::new();

    let err = pipeline
        .run("https://example.com/trips.parquet", &target(), &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Fetch(_)));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_cancellation_takes_effect_at_batch_boundary() {
    let dir = TempDir::new().unwrap();
    let fixture = write_parquet_fixture(dir.path(), 30);

    let fetcher = Arc::new(CountingFetcher::new(fixture));
    let mut pipeline = IngestPipeline::new(fetcher, RowTransformer::new(), options(dir.path()));
    let mut sink = CollectingSink::new();

    pipeline.cancellation_token().cancel();

    let err = pipeline
        .run("https://example.com/trips.parquet", &target(), &mut sink)
        .await
        .unwrap_err();

    match err {
        IngestError::Cancelled { rows_committed } => assert_eq!(rows_committed, 0),
        other => panic!("expected Cancelled, got {:?}", other),
    }
    assert_eq!(sink.row_count(), 0);
}
