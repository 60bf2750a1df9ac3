use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::IngestError;

/// Source file format, resolved once from the URL at the pipeline boundary.
/// All downstream components dispatch on this closed tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Parquet,
    Csv,
}

impl SourceFormat {
    /// Infer the format from a URL by case-insensitive substring match.
    /// The earliest matching extension wins; a URL naming neither fails
    /// before any I/O happens.
    pub fn infer(url: &str) -> Result<Self, IngestError> {
        let lower = url.to_ascii_lowercase();
        match (lower.find(".parquet"), lower.find(".csv")) {
            (Some(p), Some(c)) if p <= c => Ok(SourceFormat::Parquet),
            (Some(_), Some(_)) => Ok(SourceFormat::Csv),
            (Some(_), None) => Ok(SourceFormat::Parquet),
            (None, Some(_)) => Ok(SourceFormat::Csv),
            (None, None) => Err(IngestError::UnsupportedFormat(url.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::Parquet => "parquet",
            SourceFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A resolved source: where it lives, what it is, and where the fetched
/// copy lands locally. The local path is deterministic per format
/// (`output.<ext>`), so a prior partial download is silently overwritten.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub url: String,
    pub format: SourceFormat,
    pub local_path: PathBuf,
}

impl SourceDescriptor {
    pub fn resolve(url: &str, work_dir: &Path) -> Result<Self, IngestError> {
        let format = SourceFormat::infer(url)?;
        Ok(Self {
            url: url.to_string(),
            format,
            local_path: work_dir.join(format!("output.{}", format.extension())),
        })
    }
}

/// Destination connection parameters for one pipeline run.
///
/// The password is redacted from `Debug` output; the bundle is never
/// serialized or logged as a whole.
#[derive(Clone)]
pub struct ConnectionTarget {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub table_name: String,
}

impl ConnectionTarget {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("table_name", &self.table_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_parquet() {
        assert_eq!(
            SourceFormat::infer("https://example.com/data/trips.parquet").unwrap(),
            SourceFormat::Parquet
        );
    }

    #[test]
    fn test_infer_csv() {
        assert_eq!(
            SourceFormat::infer("https://example.com/data/trips.csv").unwrap(),
            SourceFormat::Csv
        );
    }

    #[test]
    fn test_infer_is_case_insensitive() {
        assert_eq!(
            SourceFormat::infer("https://example.com/TRIPS.PARQUET").unwrap(),
            SourceFormat::Parquet
        );
        assert_eq!(
            SourceFormat::infer("https://example.com/Trips.Csv").unwrap(),
            SourceFormat::Csv
        );
    }

    #[test]
    fn test_infer_matches_substring_anywhere() {
        // Extension buried in a query string still counts
        assert_eq!(
            SourceFormat::infer("https://example.com/download?file=x.csv&y=1").unwrap(),
            SourceFormat::Csv
        );
    }

    #[test]
    fn test_infer_first_match_wins() {
        assert_eq!(
            SourceFormat::infer("https://example.com/a.parquet/b.csv").unwrap(),
            SourceFormat::Parquet
        );
        assert_eq!(
            SourceFormat::infer("https://example.com/a.csv/b.parquet").unwrap(),
            SourceFormat::Csv
        );
    }

    #[test]
    fn test_infer_rejects_unknown_extension() {
        let err = SourceFormat::infer("https://example.com/data.json").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_descriptor_local_path_is_deterministic() {
        let d = SourceDescriptor::resolve("http://x/y.parquet", Path::new("/tmp/work")).unwrap();
        assert_eq!(d.local_path, PathBuf::from("/tmp/work/output.parquet"));
    }

    #[test]
    fn test_connection_target_debug_redacts_password() {
        let target = ConnectionTarget {
            user: "root".into(),
            password: "hunter2".into(),
            host: "localhost".into(),
            port: 5432,
            database: "ny_taxi".into(),
            table_name: "trips".into(),
        };
        let debug = format!("{:?}", target);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
