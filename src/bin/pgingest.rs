use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use pgingest::config::{AppConfig, DatabaseConfig, PipelineConfig, SourceConfig};
use pgingest::fetch::HttpFetcher;
use pgingest::pipeline::{IngestPipeline, PipelineOptions};
use pgingest::telemetry::init_telemetry;
use pgingest::transform::{NonZeroCount, RowTransformer};
use pgingest::write::PostgresTableWriter;

#[derive(Parser)]
#[command(
    name = "pgingest",
    about = "Ingest a remote Parquet/CSV dataset into Postgres",
    version
)]
struct Cli {
    /// Path to a config file; individual flags are required when omitted
    #[arg(long)]
    config: Option<String>,

    /// Postgres user
    #[arg(long, env = "PGINGEST_DATABASE_USER")]
    user: Option<String>,

    /// Postgres password
    #[arg(long, env = "PGINGEST_DATABASE_PASSWORD")]
    password: Option<String>,

    /// Postgres host
    #[arg(long)]
    host: Option<String>,

    /// Postgres port
    #[arg(long, default_value_t = 5432)]
    port: u16,

    /// Database name
    #[arg(long)]
    db: Option<String>,

    /// Name of the table to insert data into
    #[arg(long)]
    table_name: Option<String>,

    /// URL of the file to ingest
    #[arg(long)]
    url: Option<String>,

    /// Working directory for the downloaded file and cache manifests
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Drop rows whose count column equals zero
    #[arg(long)]
    drop_zero_count: Option<String>,
}

fn required(value: Option<String>, flag: &str) -> Result<String> {
    value.with_context(|| format!("--{} is required when no config file is given", flag))
}

impl Cli {
    fn into_config(self) -> Result<(AppConfig, Option<String>)> {
        let Cli {
            config,
            user,
            password,
            host,
            port,
            db,
            table_name,
            url,
            work_dir,
            drop_zero_count,
        } = self;

        let config = match config {
            Some(path) => AppConfig::load(&path)?,
            None => AppConfig {
                database: DatabaseConfig {
                    user: required(user, "user")?,
                    password: required(password, "password")?,
                    host: required(host, "host")?,
                    port,
                    database: required(db, "db")?,
                    table_name: required(table_name, "table-name")?,
                },
                source: SourceConfig {
                    url: required(url, "url")?,
                },
                pipeline: PipelineConfig {
                    work_dir: Some(work_dir),
                    ..PipelineConfig::default()
                },
            },
        };

        Ok((config, drop_zero_count))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry().map_err(|e| anyhow::anyhow!("failed to init tracing: {}", e))?;

    let (config, drop_zero_count) = Cli::parse().into_config()?;
    config.validate()?;

    let target = config.target();

    let mut transformer = RowTransformer::new();
    if let Some(column) = drop_zero_count {
        transformer = transformer.with_filter(Box::new(NonZeroCount::new(column)));
    }

    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
        config.pipeline.fetch_timeout_secs,
    ))?);
    let options = PipelineOptions {
        fetch_attempts: config.pipeline.fetch_attempts,
        write_attempts: config.pipeline.write_attempts,
        retry_backoff: Duration::from_secs(config.pipeline.retry_backoff_secs),
        cache_ttl: chrono::Duration::seconds(config.pipeline.cache_ttl_secs),
        work_dir: config
            .pipeline
            .work_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".")),
        ..PipelineOptions::default()
    };

    let mut pipeline = IngestPipeline::new(fetcher, transformer, options);
    let mut writer = PostgresTableWriter::connect(&target).await?;

    let summary = pipeline.run(&config.source.url, &target, &mut writer).await?;

    info!(
        "Done: {} rows in {} batches ({} filtered out{})",
        summary.rows_inserted,
        summary.batches,
        summary.rows_filtered,
        if summary.cache_hit {
            ", cached extract"
        } else {
            ""
        }
    );

    Ok(())
}
