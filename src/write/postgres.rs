//! PostgreSQL batch sink using sqlx.

use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    TimeUnit, TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType,
};
use arrow::record_batch::RecordBatch;
use arrow::temporal_conversions::{
    date32_to_datetime, timestamp_ms_to_datetime, timestamp_ns_to_datetime,
    timestamp_s_to_datetime, timestamp_us_to_datetime,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use tracing::debug;

use super::BatchSink;
use crate::error::IngestError;
use crate::source::ConnectionTarget;

/// Postgres wire limit is 65535 bind parameters per statement; stay
/// comfortably below it when chunking rows.
const MAX_BIND_PARAMS: usize = 60_000;

/// One cell, extracted from an Arrow column into a bindable value.
#[derive(Debug)]
enum PgValue {
    Bool(Option<bool>),
    Int2(Option<i16>),
    Int4(Option<i32>),
    Int8(Option<i64>),
    Float4(Option<f32>),
    Float8(Option<f64>),
    Text(Option<String>),
    Timestamp(Option<NaiveDateTime>),
    TimestampTz(Option<DateTime<Utc>>),
    Date(Option<NaiveDate>),
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Append-only writer holding a single connection for the pipeline's
/// lifetime. The destination table must pre-exist; no DDL is issued.
/// Each appended batch is one transaction: a failed batch leaves no
/// rows behind, so a retry re-runs it from zero and the committed-row
/// count stays exact at batch granularity.
pub struct PostgresTableWriter {
    conn: PgConnection,
    table: String,
    // Destination columns, loaded lazily on the first append.
    table_columns: Option<HashSet<String>>,
}

impl PostgresTableWriter {
    pub async fn connect(target: &ConnectionTarget) -> Result<Self, IngestError> {
        let conn = PgConnection::connect(&target.connection_string()).await?;
        debug!(
            host = %target.host,
            database = %target.database,
            table = %target.table_name,
            "connected to destination"
        );
        Ok(Self {
            conn,
            table: target.table_name.clone(),
            table_columns: None,
        })
    }

    /// Load the destination column set on first use, then verify the
    /// batch columns are a subset of it.
    async fn ensure_schema(&mut self, batch: &RecordBatch) -> Result<(), IngestError> {
        if self.table_columns.is_none() {
            let rows = sqlx::query(
                r#"
                SELECT column_name
                FROM information_schema.columns
                WHERE table_schema = current_schema() AND table_name = $1
                "#,
            )
            .bind(&self.table)
            .fetch_all(&mut self.conn)
            .await?;

            if rows.is_empty() {
                return Err(IngestError::SchemaMismatch(format!(
                    "destination table '{}' does not exist",
                    self.table
                )));
            }

            let columns: HashSet<String> = rows
                .iter()
                .map(|row| row.get::<String, _>(0))
                .collect();
            self.table_columns = Some(columns);
        }

        if let Some(destination) = &self.table_columns {
            for field in batch.schema().fields() {
                if !destination.contains(field.name()) {
                    return Err(IngestError::SchemaMismatch(format!(
                        "batch column '{}' not present in destination table '{}'",
                        field.name(),
                        self.table
                    )));
                }
            }
        }
        Ok(())
    }

    fn insert_prefix(&self, batch: &RecordBatch) -> String {
        let columns = batch
            .schema()
            .fields()
            .iter()
            .map(|f| quote_ident(f.name()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({}) ", quote_ident(&self.table), columns)
    }
}

#[async_trait]
impl BatchSink for PostgresTableWriter {
    async fn append(&mut self, batch: &RecordBatch) -> Result<usize, IngestError> {
        self.ensure_schema(batch).await?;

        let num_rows = batch.num_rows();
        if num_rows == 0 {
            return Ok(0);
        }

        let chunk_rows = rows_per_statement(batch.num_columns());
        let prefix = self.insert_prefix(batch);

        // Every statement for this batch shares one transaction; nothing
        // is visible until the final chunk commits.
        let mut tx = self.conn.begin().await?;

        let mut start = 0;
        while start < num_rows {
            let end = (start + chunk_rows).min(num_rows);

            // Extract first so bind errors surface before any SQL runs.
            let mut rows: Vec<Vec<PgValue>> = Vec::with_capacity(end - start);
            for row in start..end {
                rows.push(row_values(batch, row)?);
            }

            let mut builder = QueryBuilder::<Postgres>::new(&prefix);
            builder.push_values(rows, |mut b, row| {
                for value in row {
                    match value {
                        PgValue::Bool(v) => b.push_bind(v),
                        PgValue::Int2(v) => b.push_bind(v),
                        PgValue::Int4(v) => b.push_bind(v),
                        PgValue::Int8(v) => b.push_bind(v),
                        PgValue::Float4(v) => b.push_bind(v),
                        PgValue::Float8(v) => b.push_bind(v),
                        PgValue::Text(v) => b.push_bind(v),
                        PgValue::Timestamp(v) => b.push_bind(v),
                        PgValue::TimestampTz(v) => b.push_bind(v),
                        PgValue::Date(v) => b.push_bind(v),
                    };
                }
            });

            builder.build().execute(&mut *tx).await?;
            start = end;
        }

        tx.commit().await?;

        Ok(num_rows)
    }
}

/// Rows per INSERT statement for a given column count, keeping the bind
/// total under the limit while always making progress.
fn rows_per_statement(num_columns: usize) -> usize {
    (MAX_BIND_PARAMS / num_columns.max(1)).max(1)
}

/// Extract one row of bindable values from a batch.
fn row_values(batch: &RecordBatch, row: usize) -> Result<Vec<PgValue>, IngestError> {
    let mut values = Vec::with_capacity(batch.num_columns());

    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        let value = match field.data_type() {
            DataType::Boolean => {
                let array = column.as_boolean();
                PgValue::Bool((!array.is_null(row)).then(|| array.value(row)))
            }
            DataType::Int8 => {
                let array = column.as_primitive::<Int8Type>();
                PgValue::Int2((!array.is_null(row)).then(|| array.value(row) as i16))
            }
            DataType::Int16 => {
                let array = column.as_primitive::<Int16Type>();
                PgValue::Int2((!array.is_null(row)).then(|| array.value(row)))
            }
            DataType::Int32 => {
                let array = column.as_primitive::<Int32Type>();
                PgValue::Int4((!array.is_null(row)).then(|| array.value(row)))
            }
            DataType::Int64 => {
                let array = column.as_primitive::<Int64Type>();
                PgValue::Int8((!array.is_null(row)).then(|| array.value(row)))
            }
            DataType::Float32 => {
                let array = column.as_primitive::<Float32Type>();
                PgValue::Float4((!array.is_null(row)).then(|| array.value(row)))
            }
            DataType::Float64 => {
                let array = column.as_primitive::<Float64Type>();
                PgValue::Float8((!array.is_null(row)).then(|| array.value(row)))
            }
            DataType::Utf8 => {
                let array = column.as_string::<i32>();
                PgValue::Text((!array.is_null(row)).then(|| array.value(row).to_string()))
            }
            DataType::LargeUtf8 => {
                let array = column.as_string::<i64>();
                PgValue::Text((!array.is_null(row)).then(|| array.value(row).to_string()))
            }
            DataType::Date32 => {
                let array = column.as_primitive::<Date32Type>();
                let value = if array.is_null(row) {
                    None
                } else {
                    date32_to_datetime(array.value(row)).map(|dt| dt.date())
                };
                PgValue::Date(value)
            }
            DataType::Timestamp(unit, tz) => {
                let naive = if column.is_null(row) {
                    None
                } else {
                    let raw = match unit {
                        TimeUnit::Second => timestamp_s_to_datetime(
                            column.as_primitive::<TimestampSecondType>().value(row),
                        ),
                        TimeUnit::Millisecond => timestamp_ms_to_datetime(
                            column.as_primitive::<TimestampMillisecondType>().value(row),
                        ),
                        TimeUnit::Microsecond => timestamp_us_to_datetime(
                            column.as_primitive::<TimestampMicrosecondType>().value(row),
                        ),
                        TimeUnit::Nanosecond => timestamp_ns_to_datetime(
                            column.as_primitive::<TimestampNanosecondType>().value(row),
                        ),
                    };
                    Some(raw.ok_or_else(|| {
                        IngestError::SchemaMismatch(format!(
                            "timestamp in column '{}' out of range",
                            field.name()
                        ))
                    })?)
                };
                if tz.is_some() {
                    PgValue::TimestampTz(naive.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)))
                } else {
                    PgValue::Timestamp(naive)
                }
            }
            other => {
                return Err(IngestError::SchemaMismatch(format!(
                    "unsupported column type {:?} for '{}'",
                    other,
                    field.name()
                )));
            }
        };
        values.push(value);
    }

    Ok(values)
}
