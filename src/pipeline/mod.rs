//! Orchestration of the fetch → read → transform → write sequence.

mod cache;
mod progress;
mod retry;

pub use cache::{CacheEntry, ExtractCache};
pub use progress::{ProgressEvent, ProgressState};
pub use retry::with_retry;

use arrow::record_batch::RecordBatch;
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::fetch::SourceFetcher;
use crate::read::{BatchReader, ReaderOptions};
use crate::source::{ConnectionTarget, SourceDescriptor};
use crate::transform::RowTransformer;
use crate::write::BatchSink;

/// Pipeline lifecycle. `Failed` is reachable from any non-terminal
/// state; `Transforming` and `Writing` alternate once per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Fetching,
    Reading,
    Transforming,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Fetching => "fetching",
            PipelineState::Reading => "reading",
            PipelineState::Transforming => "transforming",
            PipelineState::Writing => "writing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Attempts for the fetch-and-extract phase.
    pub fetch_attempts: u32,
    /// Attempts per batch write; independent of the fetch budget.
    pub write_attempts: u32,
    /// Base backoff between retry attempts.
    pub retry_backoff: Duration,
    /// Validity window of the extract cache.
    pub cache_ttl: chrono::Duration,
    /// Directory holding the fetched file and cache manifests.
    pub work_dir: PathBuf,
    pub reader: ReaderOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fetch_attempts: 3,
            write_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            cache_ttl: chrono::Duration::days(1),
            work_dir: PathBuf::from("."),
            reader: ReaderOptions::default(),
        }
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunSummary {
    pub rows_inserted: u64,
    pub batches: usize,
    /// Rows dropped by the transformer's filter across all batches.
    pub rows_filtered: u64,
    /// Whether the fetch was skipped because of a valid cache entry.
    pub cache_hit: bool,
    pub events: Vec<ProgressEvent>,
}

/// Sequential, single-writer ingest pipeline.
///
/// Batches are pulled on demand: the next batch is not read until the
/// previous one has been written, so peak memory stays at one batch.
pub struct IngestPipeline {
    fetcher: Arc<dyn SourceFetcher>,
    transformer: RowTransformer,
    options: PipelineOptions,
    cache: ExtractCache,
    cancel: CancellationToken,
    state: PipelineState,
}

impl IngestPipeline {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        transformer: RowTransformer,
        options: PipelineOptions,
    ) -> Self {
        let cache = ExtractCache::new(options.work_dir.clone(), options.cache_ttl);
        Self {
            fetcher,
            transformer,
            options,
            cache,
            cancel: CancellationToken::new(),
            state: PipelineState::Idle,
        }
    }

    /// Token for requesting cancellation. Cancellation takes effect at
    /// the next batch boundary, never mid-batch.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn set_state(&mut self, next: PipelineState) {
        debug!(from = %self.state, to = %next, "pipeline state transition");
        self.state = next;
    }

    /// Run the full ingest for one source URL into one destination.
    /// Any error aborts the run; rows already written stay committed.
    pub async fn run(
        &mut self,
        url: &str,
        target: &ConnectionTarget,
        sink: &mut dyn BatchSink,
    ) -> Result<RunSummary, IngestError> {
        self.set_state(PipelineState::Idle);
        match self.execute(url, target, sink).await {
            Ok(summary) => {
                self.set_state(PipelineState::Done);
                info!(
                    rows_inserted = summary.rows_inserted,
                    batches = summary.batches,
                    rows_filtered = summary.rows_filtered,
                    cache_hit = summary.cache_hit,
                    "ingest complete"
                );
                Ok(summary)
            }
            Err(e) => {
                self.set_state(PipelineState::Failed);
                Err(e)
            }
        }
    }

    async fn execute(
        &mut self,
        url: &str,
        target: &ConnectionTarget,
        sink: &mut dyn BatchSink,
    ) -> Result<RunSummary, IngestError> {
        // Format inference happens before any network or database I/O.
        let descriptor = SourceDescriptor::resolve(url, &self.options.work_dir)?;

        self.set_state(PipelineState::Fetching);
        let key = ExtractCache::cache_key(url, target);
        let (local_path, cache_hit) = match self.cache.lookup(&key) {
            Some(entry) => {
                info!(url = %url, path = %entry.local_path.display(), "reusing cached extract");
                (entry.local_path, true)
            }
            None => {
                let fetcher = self.fetcher.clone();
                let fetch_url = descriptor.url.clone();
                let dest = descriptor.local_path.clone();
                with_retry(self.options.fetch_attempts, self.options.retry_backoff, || {
                    let fetcher = fetcher.clone();
                    let fetch_url = fetch_url.clone();
                    let dest = dest.clone();
                    async move { fetcher.fetch(&fetch_url, &dest).await }
                })
                .await?;

                self.cache.record(&CacheEntry {
                    key: key.clone(),
                    url: descriptor.url.clone(),
                    local_path: descriptor.local_path.clone(),
                    format: descriptor.format,
                    created_at: Utc::now(),
                });
                (descriptor.local_path.clone(), false)
            }
        };

        self.set_state(PipelineState::Reading);
        let reader = BatchReader::open_with(&local_path, descriptor.format, self.options.reader)?;
        let mut progress = ProgressState::new(reader.total_rows());
        let mut events = Vec::new();
        let mut rows_filtered = 0u64;
        let mut batch_index = 0usize;

        for next in reader {
            if self.cancel.is_cancelled() {
                info!(
                    rows_committed = progress.rows_inserted(),
                    "cancellation requested, stopping at batch boundary"
                );
                return Err(IngestError::Cancelled {
                    rows_committed: progress.rows_inserted(),
                });
            }

            let batch = next?;

            self.set_state(PipelineState::Transforming);
            let outcome = self.transformer.transform(&batch, batch_index)?;
            rows_filtered += outcome.matched_before as u64;

            self.set_state(PipelineState::Writing);
            let written = append_with_retry(
                sink,
                &outcome.batch,
                self.options.write_attempts,
                self.options.retry_backoff,
            )
            .await
            .map_err(|e| attach_rows_committed(e, progress.rows_inserted()))?;

            let event = progress.record(batch_index, written as u64);
            match event.percent_done {
                Some(percent) => {
                    info!("Inserted {} more rows, {}% done", event.rows_this_batch, percent)
                }
                None => info!(
                    "Inserted {} more rows, {} total",
                    event.rows_this_batch, event.cumulative_rows
                ),
            }
            events.push(event);
            batch_index += 1;
        }

        Ok(RunSummary {
            rows_inserted: progress.rows_inserted(),
            batches: batch_index,
            rows_filtered,
            cache_hit,
            events,
        })
    }
}

/// Per-batch write retry, independent of the fetch budget. Only
/// transient database failures are retried.
async fn append_with_retry(
    sink: &mut dyn BatchSink,
    batch: &RecordBatch,
    attempts: u32,
    backoff: Duration,
) -> Result<usize, IngestError> {
    let mut attempt = 1u32;
    loop {
        match sink.append(batch).await {
            Ok(written) => return Ok(written),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(attempt, attempts, error = %e, "transient write failure, retrying batch");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Stamp the rows-committed resume hint onto a terminal write failure.
fn attach_rows_committed(e: IngestError, rows_committed: u64) -> IngestError {
    match e {
        IngestError::Write {
            message, transient, ..
        } => IngestError::Write {
            rows_committed,
            message,
            transient,
        },
        other => other,
    }
}
